//! Recommendation resolver
//!
//! Multi-track, attribute-constrained variant of the similarity engine:
//! given a set of reference tracks and a set of required instrument tags,
//! pick the single best new candidate. Candidates strongly similar to
//! *any* qualifying reference win; the instrument requirement is a hard
//! filter, not a scoring term, so no single reference biases the result.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use sonara_common::instruments::InstrumentKind;
use sonara_common::Result;

use crate::engine::similarity::{SimilarityEngine, SimilarityHit};
use crate::store::{SearchFilter, VectorStore};

/// Fixed per-reference candidate width for recommendation searches.
pub const CANDIDATE_WIDTH: usize = 10;

/// Resolver over the vector store and similarity engine.
#[derive(Clone)]
pub struct RecommendationResolver {
    store: Arc<dyn VectorStore>,
    engine: SimilarityEngine,
}

impl RecommendationResolver {
    pub fn new(store: Arc<dyn VectorStore>, engine: SimilarityEngine) -> Self {
        Self { store, engine }
    }

    /// Recommend one track similar to any of the references, constrained
    /// to tracks carrying at least one of the required instrument tags.
    ///
    /// Returns `None` when the store holds one record or fewer, when no
    /// reference resolves to a stored vector, or when no candidate
    /// survives the filter. An empty requirement set means "no instrument
    /// preference" and matches everything. Equal-similarity ties resolve
    /// to the lowest track id.
    pub async fn recommend(
        &self,
        required_instruments: &[InstrumentKind],
        reference_track_ids: &[i64],
    ) -> Result<Option<i64>> {
        if self.store.count().await? <= 1 {
            debug!("Not enough stored embeddings to recommend");
            return Ok(None);
        }

        let mut reference_vectors = Vec::new();
        for &track_id in reference_track_ids {
            match self.store.vector_for_track(track_id).await? {
                Some(vector) => reference_vectors.push(vector),
                None => debug!(track_id, "Reference track has no stored embedding"),
            }
        }
        if reference_vectors.is_empty() {
            debug!("No reference track resolved to a stored embedding");
            return Ok(None);
        }

        let filter = SearchFilter {
            exclude_track_id: None,
            exclude_track_ids: reference_track_ids.to_vec(),
            any_instruments: required_instruments.to_vec(),
        };

        // Pool candidates from every reference independently; keep only
        // the best-scoring occurrence per candidate track.
        let mut pool: HashMap<i64, f64> = HashMap::new();
        for vector in &reference_vectors {
            let hits = self.store.search(vector, CANDIDATE_WIDTH, &filter).await?;
            for hit in hits {
                let similarity = 1.0 / (1.0 + hit.distance);
                let entry = pool.entry(hit.track_id).or_insert(similarity);
                if similarity > *entry {
                    *entry = similarity;
                }
            }
        }

        let winner = pool.into_iter().max_by(|(id_a, sim_a), (id_b, sim_b)| {
            sim_a
                .partial_cmp(sim_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Deterministic tie-break: lowest track id wins.
                .then_with(|| id_b.cmp(id_a))
        });

        debug!(winner = ?winner, "Recommendation resolved");
        Ok(winner.map(|(track_id, _)| track_id))
    }

    /// Run a similarity query per reference track independently.
    ///
    /// One failing track id never aborts the batch: its entry is an empty
    /// list. Every input id appears as a key exactly once.
    pub async fn recommend_batch(
        &self,
        reference_track_ids: &[i64],
        limit: usize,
    ) -> HashMap<i64, Vec<SimilarityHit>> {
        let mut results = HashMap::with_capacity(reference_track_ids.len());
        for &track_id in reference_track_ids {
            let hits = match self.engine.find_by_track_id(track_id, limit).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(track_id, error = %e, "Batch similarity lookup failed; returning empty");
                    Vec::new()
                }
            };
            results.insert(track_id, hits);
        }
        results
    }
}
