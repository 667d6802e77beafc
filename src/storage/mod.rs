//! Persistence for texts, their chunk embeddings and the model checksum.
//!
//! Embeddings live in a sqlite-vec `vec0` virtual table keyed by the id of
//! the text row they were computed from. A text row counts as embedded as
//! soon as one embedding row references it.

pub mod pool;
pub mod query;
pub mod schema;
pub mod store;

pub use pool::{ConnectionPool, PooledConnection};
pub use query::{MAX_KNN_K, NearestQuery};
pub use schema::{EMBEDDING_COLUMN_DIMS, MODEL_CHECKSUM_KEY};
pub use store::{EmbeddingRow, Neighbour, PendingText, SqliteStore};
