//! Semantic search over the stored chunk embeddings.

use super::Embedder;
use crate::content::ContentTypeFilter;
use crate::error::{EmbedderError, EmbedderResult};
use crate::quantize::{cosine_similarity_int8, quantize_embedding};
use crate::results::SearchResultMap;
use crate::storage::NearestQuery;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result count used when the caller passes a non-positive limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Similarity floor used when the caller passes a non-positive threshold.
///
/// Slightly negative so quantization noise never hides an exact match.
pub const DEFAULT_THRESHOLD: f32 = -0.1;

impl Embedder {
    /// Find stored texts similar to `query`.
    ///
    /// `limit <= 0` means [`DEFAULT_SEARCH_LIMIT`] and larger limits are capped
    /// at [`MAX_KNN_K`](crate::storage::MAX_KNN_K). An empty `iri_glob`
    /// matches every IRI and `threshold <= 0` keeps every row up to
    /// [`DEFAULT_THRESHOLD`]. Scores are `max(0, 1 - cosine distance)`.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        content_types: &ContentTypeFilter,
        iri_glob: &str,
        threshold: f32,
    ) -> EmbedderResult<SearchResultMap> {
        self.search_cancellable(
            query,
            limit,
            content_types,
            iri_glob,
            threshold,
            &CancellationToken::new(),
        )
        .await
    }

    /// [`Embedder::search`] with the content types given as `(name, enabled)`
    /// flags. Unknown names and an all-disabled set are rejected.
    pub async fn search_with_flags<'a>(
        &self,
        query: &str,
        limit: i64,
        flags: impl IntoIterator<Item = (&'a str, bool)>,
        iri_glob: &str,
        threshold: f32,
    ) -> EmbedderResult<SearchResultMap> {
        let content_types = ContentTypeFilter::from_flags(flags)?;
        self.search(query, limit, &content_types, iri_glob, threshold)
            .await
    }

    /// [`Embedder::search`] bound to the caller's cancellation scope.
    pub async fn search_cancellable(
        &self,
        query: &str,
        limit: i64,
        content_types: &ContentTypeFilter,
        iri_glob: &str,
        threshold: f32,
        cancel: &CancellationToken,
    ) -> EmbedderResult<SearchResultMap> {
        let model = self.loaded_model()?;
        if content_types.is_empty() {
            return Err(EmbedderError::InvalidFilter {
                reason: "at least one content type must be enabled".to_string(),
            });
        }

        let limit = if limit <= 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            limit as usize
        };
        let iri_glob = if iri_glob.is_empty() { "*" } else { iri_glob };
        let threshold = if threshold <= 0.0 {
            DEFAULT_THRESHOLD
        } else {
            threshold
        };

        let text = format!("{}{query}", self.config.query_prefix);
        let embedding = {
            let _slot = self.backend_slot(cancel).await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                embedding = self.backend.retrieve_single(&text) => embedding?,
            }
        };
        if embedding.len() != model.dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: model.dimensions,
                actual: embedding.len(),
            });
        }

        let quantized = quantize_embedding(&embedding);
        if let Some(probe) = &model.probe {
            let similarity = cosine_similarity_int8(&quantized, probe);
            if similarity > self.config.unreliable_threshold {
                debug!(similarity, "query embedding matches unreliable probe");
                return Err(EmbedderError::UnreliableEmbedding);
            }
        }

        let max_distance = 1.0 - f64::from(threshold);
        let nearest = NearestQuery::new(quantized, content_types.clone())
            .limit(limit)
            .max_distance(max_distance)
            .iri_glob(iri_glob);
        let hits = self.store.nearest(&nearest)?;
        debug!(hits = hits.len(), limit, max_distance, "semantic search");

        Ok(hits
            .into_iter()
            .map(|hit| (hit.fts_id, (1.0 - hit.distance).max(0.0) as f32))
            .collect())
    }
}
