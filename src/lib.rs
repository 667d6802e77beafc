//! Incremental embedding indexer and int8 semantic search over SQLite.
//!
//! Texts stored in the `texts` table are chunked, embedded by a
//! [`ModelBackend`], quantized to int8 and written to a sqlite-vec index.
//! [`Embedder`] drives that work in the background and answers similarity
//! queries against it.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod content;
pub mod embedder;
pub mod error;
pub mod logging;
pub mod quantize;
pub mod results;
pub mod storage;
pub mod tasks;

// Explicit exports for better API clarity
pub use backend::{BatchPolicy, FastEmbedBackend, ModelBackend, ModelInfo};
pub use config::{EmbedderConfig, Settings};
pub use content::{ContentType, ContentTypeFilter};
pub use embedder::{Embedder, EmbedderStatus, IndexingReport, ModelState};
pub use error::{EmbedderError, EmbedderResult, ErrorKind, StorageError, StorageResult};
pub use results::{SearchResult, SearchResultList, SearchResultMap};
pub use storage::SqliteStore;
pub use tasks::{DaemonState, TaskManager, TaskRegistry};
