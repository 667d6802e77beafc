//! Result containers for semantic search.
//!
//! `SearchResultMap` is what the search engine produces: row id to similarity
//! score. `SearchResultList` is the ordered view. Both directions of
//! conversion are provided.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single scored row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Row id of the text in the store
    pub row_id: i64,
    /// Similarity in `[0, 1]` for semantic search; higher is better
    pub score: f32,
}

impl SearchResult {
    pub fn new(row_id: i64, score: f32) -> Self {
        Self { row_id, score }
    }

    /// Score clamped to `[0, 1]`.
    ///
    /// Quantization error can push a score slightly outside the unit range.
    #[must_use]
    pub fn clamped_score(&self) -> f32 {
        self.score.clamp(0.0, 1.0)
    }
}

/// Unordered mapping from row id to score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResultMap(HashMap<i64, f32>);

impl SearchResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a score, replacing any previous score for the row.
    pub fn insert(&mut self, row_id: i64, score: f32) -> Option<f32> {
        self.0.insert(row_id, score)
    }

    pub fn get(&self, row_id: i64) -> Option<f32> {
        self.0.get(&row_id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f32)> + '_ {
        self.0.iter().map(|(&id, &score)| (id, score))
    }

    /// Row ids, sorted ascending.
    #[must_use]
    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.0.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Scores in no particular order.
    #[must_use]
    pub fn values(&self) -> Vec<f32> {
        self.0.values().copied().collect()
    }

    /// Highest scoring row. Ties go to the lowest row id.
    ///
    /// Returns `None` for an empty map.
    #[must_use]
    pub fn max(&self) -> Option<SearchResult> {
        self.extremum(|candidate, best| candidate > best)
    }

    /// Lowest scoring row. Ties go to the lowest row id.
    ///
    /// Returns `None` for an empty map.
    #[must_use]
    pub fn min(&self) -> Option<SearchResult> {
        self.extremum(|candidate, best| candidate < best)
    }

    fn extremum(&self, better: impl Fn(f32, f32) -> bool) -> Option<SearchResult> {
        let mut best: Option<SearchResult> = None;
        for id in self.keys() {
            let score = self.0[&id];
            match best {
                Some(current) if !better(score, current.score) => {}
                _ => best = Some(SearchResult::new(id, score)),
            }
        }
        best
    }

    /// Ordered view by score, ties broken by ascending row id.
    #[must_use]
    pub fn to_list(&self, descending: bool) -> SearchResultList {
        let mut results: Vec<SearchResult> = self
            .iter()
            .map(|(id, score)| SearchResult::new(id, score))
            .collect();

        results.sort_by(|a, b| {
            let by_score = a.score.total_cmp(&b.score);
            let by_score = if descending { by_score.reverse() } else { by_score };
            by_score.then(a.row_id.cmp(&b.row_id))
        });

        SearchResultList(results)
    }
}

impl FromIterator<(i64, f32)> for SearchResultMap {
    fn from_iter<T: IntoIterator<Item = (i64, f32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Ordered sequence of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResultList(Vec<SearchResult>);

impl SearchResultList {
    /// Convert back to a map. Later duplicates overwrite earlier ones.
    #[must_use]
    pub fn to_map(&self) -> SearchResultMap {
        self.0.iter().map(|r| (r.row_id, r.score)).collect()
    }

    pub fn as_slice(&self) -> &[SearchResult] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.0.iter()
    }
}

impl From<Vec<SearchResult>> for SearchResultList {
    fn from(results: Vec<SearchResult>) -> Self {
        Self(results)
    }
}

impl IntoIterator for SearchResultList {
    type Item = SearchResult;
    type IntoIter = std::vec::IntoIter<SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
