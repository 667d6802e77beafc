//! Background embedding indexer and semantic search.
//!
//! An [`Embedder`] owns the model lifecycle, drives the indexing loop that
//! turns pending texts into quantized chunk embeddings, and answers
//! nearest-neighbour queries over them.
//!
//! - [`model`]: single-flight model loading and checksum reconciliation
//! - [`indexing`]: passes, the background loop and progress reporting
//! - [`search`]: query embedding and result scoring

pub mod indexing;
pub mod model;
pub mod search;

use crate::backend::ModelBackend;
use crate::config::EmbedderConfig;
use crate::error::{EmbedderError, EmbedderResult};
use crate::storage::SqliteStore;
use crate::tasks::TaskRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use indexing::IndexingReport;
pub use model::{LoadedModel, ModelState};

/// Registry id of the indexing task. At most one pass holds it at a time.
pub const INDEXING_TASK_ID: &str = "embedding_indexer";
pub const INDEXING_TASK_DESCRIPTION: &str = "Indexing embeddings";

/// Registry id used while the model loads.
pub const MODEL_TASK_ID: &str = "embedding_model_loader";

/// Share of each chunk repeated at the start of the next one.
pub const CHUNK_OVERLAP_FRACTION: f32 = crate::chunk::DEFAULT_OVERLAP_FRACTION;

/// Engine combining a model backend, the text store and the task registry.
pub struct Embedder {
    config: EmbedderConfig,
    backend: Arc<dyn ModelBackend>,
    store: Arc<SqliteStore>,
    registry: Arc<dyn TaskRegistry>,
    state: Mutex<ModelState>,
    /// Held for the whole load so only one caller talks to the backend
    load_gate: tokio::sync::Mutex<()>,
    /// Serializes backend calls when the backend is not safe for concurrent use
    call_gate: Option<tokio::sync::Mutex<()>>,
    started: AtomicBool,
    pass_active: AtomicBool,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("backend", &"<ModelBackend>")
            .field("serialized_backend", &self.call_gate.is_some())
            .finish()
    }
}

/// Snapshot reported by [`Embedder::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedderStatus {
    pub model: String,
    pub state: &'static str,
    pub dimensions: Option<usize>,
    pub context_size: Option<usize>,
    pub max_chunk_length: Option<usize>,
    pub total_embeddable: i64,
    pub already_embedded: i64,
    pub indexing: bool,
}

impl Embedder {
    /// Build an embedder. The configuration is validated here.
    pub fn new(
        config: EmbedderConfig,
        backend: Arc<dyn ModelBackend>,
        store: Arc<SqliteStore>,
        registry: Arc<dyn TaskRegistry>,
    ) -> EmbedderResult<Self> {
        config.validate()?;
        let call_gate = (!backend.is_concurrency_safe()).then(|| tokio::sync::Mutex::new(()));
        Ok(Self {
            config,
            backend,
            store,
            registry,
            state: Mutex::new(ModelState::Unloaded),
            load_gate: tokio::sync::Mutex::new(()),
            call_gate,
            started: AtomicBool::new(false),
            pass_active: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Current model state.
    pub fn model_state(&self) -> ModelState {
        self.state.lock().clone()
    }

    /// Model and index counters.
    pub fn status(&self) -> EmbedderResult<EmbedderStatus> {
        let state = self.model_state();
        let loaded = state.loaded();
        Ok(EmbedderStatus {
            model: self.config.model.clone(),
            state: state.as_str(),
            dimensions: loaded.map(|m| m.dimensions),
            context_size: loaded.map(|m| m.context_size),
            max_chunk_length: loaded.map(|m| m.max_chunk_length),
            total_embeddable: self.store.count_total_embeddable()?,
            already_embedded: self.store.count_already_embedded()?,
            indexing: self.is_indexing(),
        })
    }

    /// Release the model and close the store.
    ///
    /// Waits for an in-flight load and for the backend call slot. Later
    /// searches fail with [`EmbedderError::ModelNotLoaded`] and storage calls
    /// fail because the pool is closed.
    pub async fn shutdown(&self) -> EmbedderResult<()> {
        let _load = self.load_gate.lock().await;
        let was_loaded = std::mem::take(&mut *self.state.lock()).is_loaded();
        let closed = {
            let _slot = self.backend_slot(&CancellationToken::new()).await?;
            self.backend.close_model().await
        };
        self.store.close();
        closed?;
        debug!(was_loaded, "embedder shut down");
        Ok(())
    }

    /// Loaded model parameters, or [`EmbedderError::ModelNotLoaded`].
    pub(crate) fn loaded_model(&self) -> EmbedderResult<LoadedModel> {
        self.state
            .lock()
            .loaded()
            .cloned()
            .ok_or(EmbedderError::ModelNotLoaded)
    }

    /// Wait for the backend call slot. Returns `None` for concurrency-safe
    /// backends.
    async fn backend_slot(
        &self,
        cancel: &CancellationToken,
    ) -> EmbedderResult<Option<tokio::sync::MutexGuard<'_, ()>>> {
        match &self.call_gate {
            None => Ok(None),
            Some(gate) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EmbedderError::Cancelled),
                guard = gate.lock() => Ok(Some(guard)),
            },
        }
    }
}
