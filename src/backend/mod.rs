//! Embedding model backends.
//!
//! The embedder talks to a model through the narrow [`ModelBackend`] trait:
//! load once, embed batches, embed a single query. How a backend manages
//! its runtime is its own business.

pub mod local;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use local::FastEmbedBackend;

/// Shape and identity of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Length of every embedding the model produces
    pub dimensions: usize,
    /// Maximum input length the model accepts
    pub context_size: usize,
    /// Identifies the exact model and quantization
    pub checksum: String,
}

/// Error type for backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to load model '{model}': {reason}")]
    Load { model: String, reason: String },

    #[error("Failed to generate embeddings: {0}")]
    Embed(String),

    #[error("Embedding model is not loaded")]
    NotLoaded,

    #[error("Backend returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Backend call cancelled")]
    Cancelled,
}

/// Capability consumed from an embedding model runtime.
///
/// Every returned vector is normalized to unit length, and `embed` returns
/// exactly one vector per input in input order.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Load (and optionally pull) the model, reporting its shape.
    async fn load_model(&self, model: &str, force_pull: bool) -> Result<ModelInfo, BackendError>;

    /// Embed a list of texts. Implementations observe `cancel` between
    /// sub-batches.
    async fn embed(
        &self,
        inputs: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Embed a single text, typically a search query.
    async fn retrieve_single(&self, input: &str) -> Result<Vec<f32>, BackendError>;

    /// Whether concurrent calls from indexing and search are safe.
    ///
    /// When false the embedder serializes all calls into this backend.
    fn is_concurrency_safe(&self) -> bool {
        false
    }

    /// Release the model.
    async fn close_model(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Sub-batching with back-pressure for backends that embed in fixed sizes.
///
/// Inputs are split into `batch_size` groups. When both the previous and the
/// current group are full, the policy waits `wait_between_batches` first.
/// The wait is cancellable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub wait_between_batches: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_between_batches: Duration::ZERO,
        }
    }
}

impl BatchPolicy {
    pub fn new(batch_size: usize, wait_between_batches: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            wait_between_batches,
        }
    }

    /// Run `embed_batch` over every sub-batch and normalize the results.
    pub async fn run<F, Fut>(
        &self,
        inputs: &[String],
        cancel: &CancellationToken,
        mut embed_batch: F,
    ) -> Result<Vec<Vec<f32>>, BackendError>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<Vec<f32>>, BackendError>>,
    {
        let batch_size = self.batch_size.max(1);
        let mut out = Vec::with_capacity(inputs.len());
        let mut previous_full = false;

        for batch in inputs.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }

            let is_full = batch.len() == batch_size;
            if !self.wait_between_batches.is_zero() && previous_full && is_full {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    _ = tokio::time::sleep(self.wait_between_batches) => {}
                }
            }
            previous_full = is_full;

            let mut embeddings = embed_batch(batch.to_vec()).await?;
            if embeddings.len() != batch.len() {
                return Err(BackendError::CountMismatch {
                    expected: batch.len(),
                    actual: embeddings.len(),
                });
            }
            normalize(&mut embeddings);
            out.extend(embeddings);
        }

        Ok(out)
    }
}

/// Scale every vector to unit L2 norm. Zero vectors are left untouched.
pub fn normalize(vectors: &mut [Vec<f32>]) {
    for vector in vectors.iter_mut() {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
    }
}
