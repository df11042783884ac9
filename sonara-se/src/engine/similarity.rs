//! Similarity engine
//!
//! Converts raw store distances into bounded similarity scores, excludes
//! trivial self-matches, and caps output size. Vector queries preserve the
//! store's native distance order; track-id queries re-rank on the rounded
//! similarity score after the transform.

use serde::{Deserialize, Serialize};
use sonara_common::{Error, Result};
use std::sync::Arc;
use tracing::debug;

use crate::store::{SearchFilter, VectorStore};

/// Extra neighbors requested beyond `k` so that exact self-matches can be
/// dropped without under-filling the result.
pub const OVERFETCH: usize = 5;

/// Default result count for similarity queries.
pub const DEFAULT_LIMIT: usize = 5;

/// One ranked similarity hit. `similarity = 1 / (1 + distance)` is a
/// strictly decreasing transform of the store's squared-L2 distance,
/// bounding the score to (0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub track_id: i64,
    pub similarity: f64,
    pub distance: f64,
}

impl SimilarityHit {
    fn from_distance(track_id: i64, distance: f64) -> Self {
        Self {
            track_id,
            similarity: 1.0 / (1.0 + distance),
            distance,
        }
    }

    /// Round score and distance to 4 decimal places (wire precision).
    pub fn rounded(mut self) -> Self {
        self.similarity = round4(self.similarity);
        self.distance = round4(self.distance);
        self
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Core ranking/filtering/deduplication over vector store results.
#[derive(Clone)]
pub struct SimilarityEngine {
    store: Arc<dyn VectorStore>,
    dim: usize,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn VectorStore>, dim: usize) -> Self {
        Self { store, dim }
    }

    /// Configured embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Find tracks similar to an embedding vector.
    ///
    /// Requests `k + OVERFETCH` raw neighbors, drops exact duplicates
    /// (`distance == 0`), truncates to `k`. Hits keep the store's
    /// distance order; if fewer than `k` survive, returns all available.
    pub async fn find_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        exclude_track_id: Option<i64>,
    ) -> Result<Vec<SimilarityHit>> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let filter = match exclude_track_id {
            Some(track_id) => SearchFilter::excluding(track_id),
            None => SearchFilter::default(),
        };

        let raw = self.store.search(vector, k + OVERFETCH, &filter).await?;
        let hits: Vec<SimilarityHit> = raw
            .into_iter()
            .filter(|hit| hit.distance > 0.0)
            .map(|hit| SimilarityHit::from_distance(hit.track_id, hit.distance))
            .take(k)
            .collect();

        debug!(hits = hits.len(), k, "Vector similarity query complete");
        Ok(hits)
    }

    /// Find tracks similar to a stored reference track.
    ///
    /// Looks up the reference vector, excludes the reference itself at the
    /// store level, and re-ranks by rounded similarity descending (stable,
    /// so store order breaks ties). A collection holding one record or
    /// fewer yields an empty result: there is nothing to compare against.
    pub async fn find_by_track_id(&self, track_id: i64, k: usize) -> Result<Vec<SimilarityHit>> {
        let count = self.store.count().await?;
        if count <= 1 {
            debug!(count, "Not enough stored embeddings for a comparison");
            return Ok(Vec::new());
        }

        let vector = self
            .store
            .vector_for_track(track_id)
            .await?
            .ok_or(Error::ReferenceNotFound(track_id))?;

        let mut hits: Vec<SimilarityHit> = self
            .find_by_vector(&vector, k, Some(track_id))
            .await?
            .into_iter()
            .map(SimilarityHit::rounded)
            .collect();

        // Post-filtering can reorder relative to raw distance order, so
        // the similarity re-sort is a correctness safeguard, not a no-op.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        debug!(track_id, hits = hits.len(), "Track similarity query complete");
        Ok(hits)
    }
}
