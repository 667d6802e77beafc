//! Error types for the embedding indexer and semantic search
//!
//! This module provides structured error types using thiserror. Every
//! embedder error belongs to one [`ErrorKind`], which decides how the
//! background loop and callers react to it.

use crate::backend::BackendError;
use crate::tasks::{DaemonState, TaskError};
use thiserror::Error;

/// Broad classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or configuration. Surfaced to the caller, never retried.
    Validation,
    /// The system is not ready yet (daemon inactive, model not loaded).
    Precondition,
    /// Another indexing pass holds the single-flight slot.
    Concurrency,
    /// The model backend failed.
    Backend,
    /// The database failed.
    Storage,
    /// Work was cancelled, usually at shutdown.
    Cancellation,
}

/// Main error type for embedder operations
#[derive(Error, Debug)]
pub enum EmbedderError {
    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Invalid content type filter: {reason}")]
    InvalidFilter { reason: String },

    #[error("Embedding dimension mismatch: got {actual} want {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: got {actual} want {expected}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Invalid model info: {reason}")]
    InvalidModel { reason: String },

    /// Precondition errors
    #[error("Embedder model not loaded")]
    ModelNotLoaded,

    #[error("Daemon must be fully active to run embedding indexing. Current state: {state}")]
    DaemonNotActive { state: DaemonState },

    #[error("Another embedding indexing task is already running")]
    AlreadyRunning,

    #[error("Query embedding is unreliable for semantic search")]
    UnreliableEmbedding,

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task registry error: {0}")]
    Task(#[from] TaskError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<BackendError> for EmbedderError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => Self::Cancelled,
            other => Self::Backend(other),
        }
    }
}

impl From<rusqlite::Error> for EmbedderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(err))
    }
}

impl EmbedderError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. }
            | Self::InvalidFilter { .. }
            | Self::DimensionMismatch { .. }
            | Self::CountMismatch { .. }
            | Self::InvalidModel { .. }
            | Self::UnreliableEmbedding => ErrorKind::Validation,
            Self::ModelNotLoaded | Self::DaemonNotActive { .. } => ErrorKind::Precondition,
            Self::AlreadyRunning => ErrorKind::Concurrency,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Storage(_) | Self::Task(_) => ErrorKind::Storage,
            Self::Cancelled => ErrorKind::Cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::InvalidFilter { .. } => "INVALID_FILTER",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::CountMismatch { .. } => "COUNT_MISMATCH",
            Self::InvalidModel { .. } => "INVALID_MODEL",
            Self::ModelNotLoaded => "MODEL_NOT_LOADED",
            Self::DaemonNotActive { .. } => "DAEMON_NOT_ACTIVE",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::UnreliableEmbedding => "UNRELIABLE_EMBEDDING",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Task(_) => "TASK_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Schema error: {0}")]
    Schema(String),
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;
pub type StorageResult<T> = Result<T, StorageError>;
