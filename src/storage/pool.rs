//! Scoped SQLite connections.
//!
//! Every logical unit of work (a fetch, a transactional insert, a search)
//! takes a connection from the pool and gives it back when the guard drops.
//! Connections are never held across a sleep or a backend call.

use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static REGISTER_VEC: Once = Once::new();

/// Make the sqlite-vec functions and the `vec0` module available on every
/// connection opened by this process.
fn register_sqlite_vec() {
    REGISTER_VEC.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature SQLite expects for an
        // extension entry point, and auto extensions are process global.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Pool of connections to one database file.
#[derive(Debug)]
pub struct ConnectionPool {
    path: PathBuf,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool for the database at `path`. Keeps at most `max_idle`
    /// connections open between uses.
    pub fn open(path: impl AsRef<Path>, max_idle: usize) -> StorageResult<Self> {
        register_sqlite_vec();
        let pool = Self {
            path: path.as_ref().to_path_buf(),
            max_idle: max_idle.max(1),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        // Open one connection eagerly so a bad path fails here
        let conn = pool.connect()?;
        pool.idle.lock().push(conn);
        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a connection. It returns to the pool when the guard drops.
    pub fn get(&self) -> StorageResult<PooledConnection<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::PoolClosed);
        }
        let conn = match self.idle.lock().pop() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Drop idle connections and refuse new acquisitions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.idle.lock().clear();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn connect(&self) -> StorageResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(|source| StorageError::Open {
                path: self.path.display().to_string(),
                source,
            })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!(path = %self.path.display(), "opened database connection");
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// A connection borrowed from a [`ConnectionPool`].
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in Drop
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
