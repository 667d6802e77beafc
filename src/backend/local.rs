//! Local embedding backend over fastembed (ONNX runtime).

use super::{BackendError, BatchPolicy, ModelBackend, ModelInfo, normalize};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Input length fastembed truncates to by default.
pub const FASTEMBED_CONTEXT_SIZE: usize = 512;

/// Default model cache location, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".fastembed_cache";

/// Map a configured model name onto a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, BackendError> {
    let model = match name {
        "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
        "AllMiniLML6V2Q" => EmbeddingModel::AllMiniLML6V2Q,
        "AllMiniLML12V2" => EmbeddingModel::AllMiniLML12V2,
        "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
        "ParaphraseMLMiniLML12V2" => EmbeddingModel::ParaphraseMLMiniLML12V2,
        "MultilingualE5Small" => EmbeddingModel::MultilingualE5Small,
        other => {
            return Err(BackendError::Load {
                model: other.to_string(),
                reason: "unsupported model, expected one of AllMiniLML6V2, AllMiniLML6V2Q, \
                         AllMiniLML12V2, BGESmallENV15, ParaphraseMLMiniLML12V2, \
                         MultilingualE5Small"
                    .to_string(),
            });
        }
    };
    Ok(model)
}

/// Identity of a model as stored next to its vectors.
pub fn model_checksum(model: &str, dimensions: usize, context_size: usize) -> String {
    let digest = Sha256::digest(format!("fastembed:{model}:{dimensions}:{context_size}"));
    format!("{digest:x}")
}

/// Embedding backend running a fastembed model in-process.
///
/// The model sits behind a mutex and every call runs on the blocking pool,
/// so the backend is safe to share between indexing and search.
pub struct FastEmbedBackend {
    model: Arc<Mutex<Option<TextEmbedding>>>,
    cache_dir: PathBuf,
    policy: BatchPolicy,
    show_download_progress: bool,
}

impl std::fmt::Debug for FastEmbedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedBackend")
            .field("loaded", &self.model.lock().is_some())
            .field("cache_dir", &self.cache_dir)
            .field("policy", &self.policy)
            .finish()
    }
}

impl FastEmbedBackend {
    pub fn new(cache_dir: impl Into<PathBuf>, policy: BatchPolicy) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            cache_dir: cache_dir.into(),
            policy,
            show_download_progress: false,
        }
    }

    /// Print download progress when the model is pulled.
    pub fn with_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn has_cached_models(&self) -> bool {
        self.cache_dir.exists()
            && self
                .cache_dir
                .read_dir()
                .is_ok_and(|mut entries| entries.any(|_| true))
    }

    async fn embed_blocking(
        model: Arc<Mutex<Option<TextEmbedding>>>,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        tokio::task::spawn_blocking(move || {
            let mut guard = model.lock();
            let model = guard.as_mut().ok_or(BackendError::NotLoaded)?;
            model
                .embed(texts, None)
                .map_err(|e| BackendError::Embed(e.to_string()))
        })
        .await
        .map_err(|e| BackendError::Embed(format!("embedding worker failed: {e}")))?
    }
}

#[async_trait]
impl ModelBackend for FastEmbedBackend {
    async fn load_model(&self, model: &str, force_pull: bool) -> Result<ModelInfo, BackendError> {
        let embedding_model = parse_embedding_model(model)?;

        if !force_pull && !self.has_cached_models() {
            return Err(BackendError::Load {
                model: model.to_string(),
                reason: format!(
                    "no cached model in {}; enable force_pull to download it",
                    self.cache_dir.display()
                ),
            });
        }

        info!(model, cache_dir = %self.cache_dir.display(), "loading embedding model");
        let options = InitOptions::new(embedding_model)
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(self.show_download_progress);
        let name = model.to_string();

        let (text_model, dimensions) = tokio::task::spawn_blocking(move || {
            let mut text_model = TextEmbedding::try_new(options).map_err(|e| BackendError::Load {
                model: name.clone(),
                reason: e.to_string(),
            })?;

            // Warm-up embedding doubles as the dimension probe
            let probe = text_model
                .embed(vec!["warmup"], None)
                .map_err(|e| BackendError::Load {
                    model: name.clone(),
                    reason: format!("warm-up embedding failed: {e}"),
                })?;
            let dimensions = probe.first().map(Vec::len).unwrap_or_default();
            Ok::<_, BackendError>((text_model, dimensions))
        })
        .await
        .map_err(|e| BackendError::Load {
            model: model.to_string(),
            reason: format!("loader task failed: {e}"),
        })??;

        *self.model.lock() = Some(text_model);
        debug!(model, dimensions, "embedding model ready");

        Ok(ModelInfo {
            dimensions,
            context_size: FASTEMBED_CONTEXT_SIZE,
            checksum: model_checksum(model, dimensions, FASTEMBED_CONTEXT_SIZE),
        })
    }

    async fn embed(
        &self,
        inputs: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        if self.model.lock().is_none() {
            return Err(BackendError::NotLoaded);
        }
        self.policy
            .run(inputs, cancel, |batch| {
                Self::embed_blocking(self.model.clone(), batch)
            })
            .await
    }

    async fn retrieve_single(&self, input: &str) -> Result<Vec<f32>, BackendError> {
        let mut embeddings = Self::embed_blocking(self.model.clone(), vec![input.to_string()]).await?;
        if embeddings.len() != 1 {
            return Err(BackendError::CountMismatch {
                expected: 1,
                actual: embeddings.len(),
            });
        }
        normalize(&mut embeddings);
        Ok(embeddings.remove(0))
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn close_model(&self) -> Result<(), BackendError> {
        self.model.lock().take();
        Ok(())
    }
}
