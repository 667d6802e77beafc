//! Typed queries over the text and embedding tables.

use super::pool::{ConnectionPool, PooledConnection};
use super::query::NearestQuery;
use super::schema::{self, EMBEDDING_COLUMN_DIMS, MODEL_CHECKSUM_KEY};
use crate::content::ContentType;
use crate::error::{StorageError, StorageResult};
use rusqlite::{OptionalExtension, params, params_from_iter};
use std::path::Path;
use tracing::debug;

/// A text row that still needs embeddings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingText {
    pub id: i64,
    pub raw_content: String,
}

/// One quantized chunk embedding belonging to a text row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingRow {
    pub fts_id: i64,
    pub vector: Vec<i8>,
}

/// A nearest-neighbour hit: text row id and cosine distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub fts_id: i64,
    pub distance: f64,
}

/// SQLite-backed store for texts, embeddings and the model checksum.
#[derive(Debug)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>, pool_size: usize) -> StorageResult<Self> {
        let pool = ConnectionPool::open(path, pool_size)?;
        {
            let conn = pool.get()?;
            schema::ensure_schema(&conn)?;
        }
        debug!(path = %pool.path().display(), "store ready");
        Ok(Self { pool })
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    pub fn connection(&self) -> StorageResult<PooledConnection<'_>> {
        self.pool.get()
    }

    pub fn close(&self) {
        self.pool.close();
    }

    /// Number of embeddable rows: title, document or comment with more than
    /// three characters.
    pub fn count_total_embeddable(&self) -> StorageResult<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM texts
                 WHERE kind IN ({}) AND length(raw_content) > 3",
                schema::embeddable_kinds_sql()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of distinct text rows with at least one embedding.
    pub fn count_already_embedded(&self) -> StorageResult<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT fts_id) FROM embeddings",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Up to `limit` embeddable rows without any embedding, lowest id first.
    pub fn fetch_pending(&self, limit: usize) -> StorageResult<Vec<PendingText>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT t.id, t.raw_content FROM texts t
             WHERE t.kind IN ({}) AND length(t.raw_content) > 3
               AND t.id NOT IN (SELECT fts_id FROM embeddings)
             ORDER BY t.id
             LIMIT ?1",
            schema::embeddable_kinds_sql()
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PendingText {
                    id: row.get(0)?,
                    raw_content: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert all rows in one transaction. Either every row lands or none.
    pub fn insert_embeddings(&self, rows: &[EmbeddingRow]) -> StorageResult<()> {
        if let Some(bad) = rows.iter().find(|r| r.vector.len() != EMBEDDING_COLUMN_DIMS) {
            return Err(StorageError::Schema(format!(
                "embedding for row {} has {} dimensions, column holds {EMBEDDING_COLUMN_DIMS}",
                bad.fts_id,
                bad.vector.len()
            )));
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings (embedding, fts_id) VALUES (vec_int8(?1), ?2)",
            )?;
            for row in rows {
                stmt.execute(params![
                    bytemuck::cast_slice::<i8, u8>(&row.vector),
                    row.fts_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Checksum of the model that produced the stored embeddings.
    pub fn model_checksum(&self) -> StorageResult<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![MODEL_CHECKSUM_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Delete every embedding and record `checksum`, atomically.
    pub fn reset_embeddings(&self, checksum: &str) -> StorageResult<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM embeddings", [])?;
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![MODEL_CHECKSUM_KEY, checksum],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Run a nearest-neighbour lookup, closest first, one hit per text row.
    pub fn nearest(&self, query: &NearestQuery) -> StorageResult<Vec<Neighbour>> {
        let (sql, values) = query.to_sql();
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(Neighbour {
                    fts_id: row.get(0)?,
                    distance: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Add a text row and return its id.
    pub fn insert_text(&self, kind: ContentType, raw_content: &str, iri: &str) -> StorageResult<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO texts (raw_content, kind, iri) VALUES (?1, ?2, ?3)",
            params![raw_content, kind.as_str(), iri],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Store one embedding for `fts_id` as-is.
    pub fn insert_raw_embedding(&self, fts_id: i64, vector: &[i8]) -> StorageResult<()> {
        self.insert_embeddings(&[EmbeddingRow {
            fts_id,
            vector: vector.to_vec(),
        }])
    }

    pub fn count_embeddings(&self) -> StorageResult<i64> {
        let conn = self.connection()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?)
    }

    pub fn count_embeddings_for(&self, fts_id: i64) -> StorageResult<i64> {
        let conn = self.connection()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE fts_id = ?1",
            params![fts_id],
            |row| row.get(0),
        )?)
    }

    /// Raw content of a text row.
    pub fn text(&self, id: i64) -> StorageResult<Option<(ContentType, String)>> {
        let conn = self.connection()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT kind, raw_content FROM texts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((kind, content)) => {
                let kind = kind
                    .parse::<ContentType>()
                    .map_err(|e| StorageError::Schema(e.to_string()))?;
                Ok(Some((kind, content)))
            }
        }
    }
}
