//! Model lifecycle: `unloaded -> loading -> loaded`.
//!
//! The transition to `loaded` happens once per embedder. A failed load
//! leaves the state `unloaded` so the next caller retries.

use super::{Embedder, MODEL_TASK_ID};
use crate::backend::ModelInfo;
use crate::error::{EmbedderError, EmbedderResult};
use crate::quantize::quantize_embedding;
use crate::storage::EMBEDDING_COLUMN_DIMS;
use crate::tasks::TaskKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parameters of a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub dimensions: usize,
    pub context_size: usize,
    /// Longest chunk, in characters, sent to the backend
    pub max_chunk_length: usize,
    pub checksum: String,
    /// Quantized embedding of the configured unreliable-query probe
    pub probe: Option<Vec<i8>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Loaded(LoadedModel),
}

impl ModelState {
    pub fn loaded(&self) -> Option<&LoadedModel> {
        match self {
            Self::Loaded(model) => Some(model),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded(_) => "loaded",
        }
    }
}

/// Undoes an unfinished load: a state still `loading` goes back to
/// `unloaded` and the loading task is removed. Runs on error and when the
/// load future is dropped.
struct LoadGuard<'a> {
    embedder: &'a Embedder,
    tracked: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.embedder.state.lock();
            if *state == ModelState::Loading {
                *state = ModelState::Unloaded;
            }
        }
        if self.tracked {
            let _ = self.embedder.registry.delete_task(MODEL_TASK_ID);
        }
    }
}

/// Chunks use 90% of the context, leaving room for prefixes and tokenizer
/// overhead.
pub fn max_chunk_length(context_size: usize) -> usize {
    ((context_size as f64 * 0.9).floor() as usize).max(1)
}

impl Embedder {
    /// Load the model if it is not loaded yet.
    ///
    /// Concurrent callers wait for the first one; once loaded this is a
    /// cheap no-op.
    pub async fn ensure_model(&self, cancel: &CancellationToken) -> EmbedderResult<LoadedModel> {
        if let Some(model) = self.state.lock().loaded() {
            return Ok(model.clone());
        }

        let _load = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
            guard = self.load_gate.lock() => guard,
        };

        // Another caller may have finished while we waited
        {
            let mut state = self.state.lock();
            if let Some(model) = state.loaded() {
                return Ok(model.clone());
            }
            *state = ModelState::Loading;
        }

        // The loading task is informational, a clash is not an error
        let tracked = self
            .registry
            .add_task(
                MODEL_TASK_ID,
                TaskKind::LoadingModel,
                &format!("Loading embedding model {}", self.config.model),
                1,
            )
            .is_ok();
        let _loading = LoadGuard {
            embedder: self,
            tracked,
        };

        let model = self.load(cancel).await?;
        *self.state.lock() = ModelState::Loaded(model.clone());
        Ok(model)
    }

    async fn load(&self, cancel: &CancellationToken) -> EmbedderResult<LoadedModel> {
        info!(model = %self.config.model, force_pull = self.config.force_pull, "loading embedding model");

        let info = {
            let _slot = self.backend_slot(cancel).await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                info = self.backend.load_model(&self.config.model, self.config.force_pull) => info?,
            }
        };
        validate_model_info(&info)?;

        match self.store.model_checksum()? {
            Some(stored) if stored == info.checksum => {
                debug!(checksum = %stored, "model checksum unchanged");
            }
            stored => {
                let deleted = self.store.reset_embeddings(&info.checksum)?;
                if stored.as_deref().is_some_and(|s| !s.is_empty()) {
                    warn!(
                        previous = ?stored,
                        current = %info.checksum,
                        deleted,
                        "embedding model changed, existing embeddings discarded"
                    );
                } else {
                    info!(checksum = %info.checksum, deleted, "recorded embedding model checksum");
                }
            }
        }

        let probe = match &self.config.unreliable_probe {
            None => None,
            Some(text) => {
                let _slot = self.backend_slot(cancel).await?;
                let vector = self.backend.retrieve_single(text).await?;
                if vector.len() != info.dimensions {
                    return Err(EmbedderError::DimensionMismatch {
                        expected: info.dimensions,
                        actual: vector.len(),
                    });
                }
                Some(quantize_embedding(&vector))
            }
        };

        let model = LoadedModel {
            dimensions: info.dimensions,
            context_size: info.context_size,
            max_chunk_length: max_chunk_length(info.context_size),
            checksum: info.checksum,
            probe,
        };
        info!(
            dimensions = model.dimensions,
            context_size = model.context_size,
            max_chunk_length = model.max_chunk_length,
            "embedding model loaded"
        );
        Ok(model)
    }
}

fn validate_model_info(info: &ModelInfo) -> EmbedderResult<()> {
    if info.dimensions != EMBEDDING_COLUMN_DIMS {
        return Err(EmbedderError::Config {
            reason: format!(
                "model produces {}-dimensional embeddings but the index stores {EMBEDDING_COLUMN_DIMS}",
                info.dimensions
            ),
        });
    }
    if info.context_size == 0 {
        return Err(EmbedderError::InvalidModel {
            reason: "context size must be positive".to_string(),
        });
    }
    if info.checksum.is_empty() {
        return Err(EmbedderError::InvalidModel {
            reason: "checksum must not be empty".to_string(),
        });
    }
    Ok(())
}
