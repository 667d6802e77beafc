//! Indexing passes and the background loop.
//!
//! A pass registers [`INDEXING_TASK_ID`], then repeatedly fetches pending
//! texts, embeds their chunks and stores the quantized vectors until nothing
//! is pending. The loop runs a pass, idles for the configured interval and
//! starts over until cancelled.

use super::{CHUNK_OVERLAP_FRACTION, Embedder, INDEXING_TASK_DESCRIPTION, INDEXING_TASK_ID};
use crate::chunk::chunk_text;
use crate::error::{EmbedderError, EmbedderResult, ErrorKind};
use crate::quantize::quantize_embedding;
use crate::storage::{EmbeddingRow, PendingText};
use crate::tasks::{DaemonState, TaskError, TaskKind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingReport {
    /// Text rows that received embeddings
    pub rows: usize,
    /// Chunk vectors written
    pub vectors: usize,
    /// Fetch iterations that found work
    pub batches: usize,
}

/// Marks a pass active and releases the indexing task when dropped, also
/// when the pass future itself is dropped mid-batch.
struct PassGuard<'a> {
    embedder: &'a Embedder,
}

impl<'a> PassGuard<'a> {
    fn acquire(embedder: &'a Embedder) -> Self {
        embedder.pass_active.store(true, Ordering::Release);
        Self { embedder }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.embedder.pass_active.store(false, Ordering::Release);
        match self.embedder.registry.delete_task(INDEXING_TASK_ID) {
            Ok(_) | Err(TaskError::NotFound(_)) => {}
            Err(e) => warn!(error = %e, "failed to remove indexing task"),
        }
    }
}

impl Embedder {
    /// Spawn the background loop. Only the first call starts it; later calls
    /// return `None`.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("embedding indexer already started");
            return None;
        }
        let embedder = Arc::clone(self);
        Some(tokio::spawn(async move { embedder.run_loop(cancel).await }))
    }

    /// Whether a pass currently holds the indexing task.
    pub fn is_indexing(&self) -> bool {
        self.pass_active.load(Ordering::Acquire)
    }

    /// Run passes until cancelled. With a zero interval a single pass runs.
    pub async fn run_loop(&self, cancel: CancellationToken) {
        info!(interval = ?self.config.interval, "embedding indexer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_once(&cancel).await {
                Ok(report) if report.rows > 0 => {
                    info!(rows = report.rows, vectors = report.vectors, "embedding pass complete");
                }
                Ok(_) => debug!("no texts pending embedding"),
                Err(e) => match e.kind() {
                    ErrorKind::Cancellation => {
                        info!("embedding pass cancelled");
                        break;
                    }
                    ErrorKind::Precondition | ErrorKind::Concurrency => {
                        info!(reason = %e, "embedding pass skipped");
                    }
                    ErrorKind::Validation | ErrorKind::Backend => {
                        warn!(error = %e, code = e.status_code(), "embedding pass failed");
                    }
                    ErrorKind::Storage => {
                        error!(error = %e, code = e.status_code(), "embedding pass failed");
                    }
                },
            }

            if self.config.runs_once() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("embedding indexer idle wait cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        info!("embedding indexer stopped");
    }

    /// Run one pass now: load the model if needed, then embed everything
    /// pending.
    ///
    /// Fails with [`EmbedderError::AlreadyRunning`] while another pass holds
    /// the indexing task.
    pub async fn run_once(&self, cancel: &CancellationToken) -> EmbedderResult<IndexingReport> {
        let model = self.ensure_model(cancel).await?;

        let total = self.store.count_total_embeddable()?;
        let already_embedded = self.store.count_already_embedded()?;

        let state = self.registry.global_state();
        if state != DaemonState::Active {
            return Err(EmbedderError::DaemonNotActive { state });
        }

        match self.registry.add_task(
            INDEXING_TASK_ID,
            TaskKind::Embedding,
            INDEXING_TASK_DESCRIPTION,
            total,
        ) {
            Ok(_) => {}
            Err(TaskError::AlreadyExists(_)) => return Err(EmbedderError::AlreadyRunning),
            Err(e) => return Err(e.into()),
        }
        let _pass = PassGuard::acquire(self);

        if let Err(e) = self
            .registry
            .update_progress(INDEXING_TASK_ID, total, already_embedded)
        {
            debug!(error = %e, "initial progress update failed");
        }

        self.embed_pending(model.max_chunk_length, model.dimensions, total, already_embedded, cancel)
            .await
    }

    async fn embed_pending(
        &self,
        max_chunk_length: usize,
        dimensions: usize,
        total: i64,
        mut completed: i64,
        cancel: &CancellationToken,
    ) -> EmbedderResult<IndexingReport> {
        let mut report = IndexingReport::default();

        loop {
            let pending = self.store.fetch_pending(self.config.pass_size)?;
            if pending.is_empty() {
                return Ok(report);
            }

            let rows = self
                .embed_batch(&pending, max_chunk_length, dimensions, cancel)
                .await?;
            self.store.insert_embeddings(&rows)?;

            report.rows += pending.len();
            report.vectors += rows.len();
            report.batches += 1;
            completed += pending.len() as i64;
            if let Err(e) = self.registry.update_progress(INDEXING_TASK_ID, total, completed) {
                debug!(error = %e, "progress update failed");
            }
            debug!(rows = pending.len(), vectors = rows.len(), completed, total, "embedded batch");

            if !self.config.sleep_between_passes.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                    _ = tokio::time::sleep(self.config.sleep_between_passes) => {}
                }
            }
        }
    }

    /// Chunk, embed and quantize one fetched batch. Chunks of a row stay
    /// contiguous and in order.
    async fn embed_batch(
        &self,
        pending: &[PendingText],
        max_chunk_length: usize,
        dimensions: usize,
        cancel: &CancellationToken,
    ) -> EmbedderResult<Vec<EmbeddingRow>> {
        let mut owners = Vec::new();
        let mut inputs = Vec::new();
        for text in pending {
            for chunk in chunk_text(&text.raw_content, max_chunk_length, CHUNK_OVERLAP_FRACTION) {
                owners.push(text.id);
                inputs.push(format!("{}{chunk}", self.config.document_prefix));
            }
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = {
            let _slot = self.backend_slot(cancel).await?;
            self.backend.embed(&inputs, cancel).await?
        };

        if embeddings.len() != inputs.len() {
            return Err(EmbedderError::CountMismatch {
                expected: inputs.len(),
                actual: embeddings.len(),
            });
        }

        owners
            .into_iter()
            .zip(embeddings)
            .map(|(fts_id, embedding)| {
                if embedding.len() != dimensions {
                    return Err(EmbedderError::DimensionMismatch {
                        expected: dimensions,
                        actual: embedding.len(),
                    });
                }
                Ok(EmbeddingRow {
                    fts_id,
                    vector: quantize_embedding(&embedding),
                })
            })
            .collect()
    }
}
