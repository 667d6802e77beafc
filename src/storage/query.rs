//! Nearest-neighbour query construction.

use crate::content::ContentTypeFilter;
use rusqlite::types::Value;

/// Largest `k` sqlite-vec accepts in a KNN query.
pub const MAX_KNN_K: usize = 4096;

/// A k-nearest-neighbour lookup over stored embeddings.
///
/// `k` bounds the chunk vectors considered before the kind and IRI filters
/// apply, so fewer than `limit` rows can come back.
///
/// Only validated filter values reach the generated SQL; the vector, limit,
/// distance bound and glob are always bound as parameters.
#[derive(Debug, Clone)]
pub struct NearestQuery {
    vector: Vec<i8>,
    content_types: ContentTypeFilter,
    limit: usize,
    max_distance: f64,
    iri_glob: Option<String>,
}

impl NearestQuery {
    pub fn new(vector: Vec<i8>, content_types: ContentTypeFilter) -> Self {
        Self {
            vector,
            content_types,
            limit: 20,
            max_distance: 1.0,
            iri_glob: None,
        }
    }

    /// Clamped to `1..=MAX_KNN_K`.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_KNN_K);
        self
    }

    /// Exclusive upper bound on cosine distance.
    pub fn max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Restrict to texts whose IRI matches `glob`. `"*"` and the empty
    /// string match everything and add no predicate.
    pub fn iri_glob(mut self, glob: impl Into<String>) -> Self {
        let glob = glob.into();
        self.iri_glob = match glob.as_str() {
            "" | "*" => None,
            _ => Some(glob),
        };
        self
    }

    pub fn vector(&self) -> &[i8] {
        &self.vector
    }

    /// SQL text and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = vec![
            Value::Blob(bytemuck::cast_slice::<i8, u8>(&self.vector).to_vec()),
            Value::Integer(self.limit as i64),
            Value::Real(self.max_distance),
        ];

        let placeholders = self
            .content_types
            .iter()
            .map(|ct| {
                params.push(Value::Text(ct.as_str().to_string()));
                "?"
            })
            .collect::<Vec<_>>()
            .join(", ");

        // vec0 only accepts its own distance ordering, so the KNN scan must not
        // be flattened into the grouped outer query
        let mut sql = format!(
            "WITH knn AS MATERIALIZED (
                SELECT fts_id, distance FROM embeddings
                WHERE embedding MATCH vec_int8(?) AND k = ?
            )
            SELECT knn.fts_id, MIN(knn.distance) AS best
            FROM knn JOIN texts t ON t.id = knn.fts_id
            WHERE knn.distance < ? AND t.kind IN ({placeholders})"
        );

        if let Some(glob) = &self.iri_glob {
            sql.push_str(" AND t.iri GLOB ?");
            params.push(Value::Text(glob.clone()));
        }
        // One hit per text row, at its closest chunk
        sql.push_str(" GROUP BY knn.fts_id ORDER BY best, knn.fts_id");

        (sql, params)
    }
}
