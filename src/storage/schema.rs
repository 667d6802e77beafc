//! Database schema.

use crate::content::ContentType;
use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;

/// Width of the stored embedding column. Models must match it exactly.
pub const EMBEDDING_COLUMN_DIMS: usize = 384;

/// Key in `kv` holding the checksum of the model the embeddings came from.
pub const MODEL_CHECKSUM_KEY: &str = "embedding_model_checksum";

/// Create tables that do not exist yet.
pub fn ensure_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS texts (
            id INTEGER PRIMARY KEY,
            raw_content TEXT NOT NULL,
            kind TEXT NOT NULL,
            iri TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS texts_kind ON texts(kind);
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS embeddings USING vec0(
            embedding int8[{EMBEDDING_COLUMN_DIMS}] distance_metric=cosine,
            fts_id integer
        );"
    ))
    .map_err(|e| StorageError::Schema(e.to_string()))
}

/// `'title', 'document', 'comment'` for use in an `IN` list.
pub(crate) fn embeddable_kinds_sql() -> String {
    ContentType::EMBEDDABLE
        .iter()
        .map(|ct| format!("'{}'", ct.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}
