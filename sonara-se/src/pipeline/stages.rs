//! Stage execution
//!
//! Each stage yields a tagged outcome instead of using exceptions as
//! control flow: `Advance` carries the updated chain state, `Degraded`
//! advances the chain with a reduced result (a half-successful chain
//! still completes and reports "no results"), and `Fatal` hands the
//! error to the scheduler's retry policy.

use sonara_common::{Error, InstrumentFlags, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::SimilarityEngine;
use crate::extractor::EmbeddingExtractor;
use crate::store::VectorStore;

use super::{CallbackClient, ChainStage, ChainState, ExtractOutput};

/// Outcome of one stage execution.
#[derive(Debug)]
pub enum StageOutcome {
    /// Stage succeeded; continue with the updated state.
    Advance(ChainState),
    /// Stage produced a reduced result; continue anyway.
    Degraded(ChainState, String),
    /// Transient failure; the scheduler decides retry or terminal failure.
    Fatal(Error),
}

/// Executes chain stages against the service's collaborators.
#[derive(Clone)]
pub struct StageRunner {
    store: Arc<dyn VectorStore>,
    extractor: Arc<dyn EmbeddingExtractor>,
    engine: SimilarityEngine,
    callback: CallbackClient,
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn VectorStore>,
        extractor: Arc<dyn EmbeddingExtractor>,
        engine: SimilarityEngine,
        callback: CallbackClient,
    ) -> Self {
        Self {
            store,
            extractor,
            engine,
            callback,
        }
    }

    /// Run one stage of a chain.
    pub async fn run(&self, stage: ChainStage, state: ChainState) -> StageOutcome {
        match stage {
            ChainStage::ExtractStore => self.extract_store(state).await,
            ChainStage::FindSimilar => self.find_similar(state).await,
            ChainStage::SendCallback => self.send_callback(state).await,
            ChainStage::Cleanup => self.cleanup(state).await,
        }
    }

    /// Stage 1: extract an embedding and store it.
    ///
    /// Extraction producing nothing is a degraded outcome (the marker
    /// lets downstream stages complete with empty results). A store
    /// failure is infrastructure trouble and retryable.
    async fn extract_store(&self, mut state: ChainState) -> StageOutcome {
        let file_path = state.submission.file_path.clone();

        let flags = match &state.submission.instrument_types {
            Some(indices) => match InstrumentFlags::from_indices(indices) {
                Ok(flags) => flags,
                Err(e) => {
                    state.extract = Some(ExtractOutput::Failed);
                    return StageOutcome::Degraded(state, format!("invalid instrument types: {e}"));
                }
            },
            None => InstrumentFlags::default(),
        };

        let vector = match self.extractor.extract(Path::new(&file_path)).await {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                state.extract = Some(ExtractOutput::Failed);
                return StageOutcome::Degraded(
                    state,
                    format!("extraction produced no embedding for {file_path}"),
                );
            }
            Err(e) => return StageOutcome::Fatal(e),
        };

        match self
            .store
            .insert(&vector, state.submission.track_id, flags)
            .await
        {
            Ok(id) => {
                info!(id, track_id = ?state.submission.track_id, "Embedding stored");
                state.extract = Some(ExtractOutput::Stored {
                    track_id: state.submission.track_id,
                });
                StageOutcome::Advance(state)
            }
            Err(e) => StageOutcome::Fatal(e),
        }
    }

    /// Stage 2: similarity search for the stored track.
    ///
    /// A failed upstream extraction (or a submission without a track id)
    /// short-circuits to an empty hit list. An unknown reference is a
    /// business outcome, also an empty list. Store trouble is retryable.
    async fn find_similar(&self, mut state: ChainState) -> StageOutcome {
        let track_id = match &state.extract {
            Some(ExtractOutput::Stored {
                track_id: Some(track_id),
            }) => *track_id,
            Some(ExtractOutput::Stored { track_id: None }) => {
                state.hits = Some(Vec::new());
                return StageOutcome::Degraded(
                    state,
                    "similarity search skipped: submission has no track id".to_string(),
                );
            }
            Some(ExtractOutput::Failed) | None => {
                state.hits = Some(Vec::new());
                return StageOutcome::Degraded(
                    state,
                    "similarity search skipped: upstream extraction failed".to_string(),
                );
            }
        };

        match self
            .engine
            .find_by_track_id(track_id, state.submission.limit)
            .await
        {
            Ok(hits) => {
                info!(track_id, hits = hits.len(), "Similarity search complete");
                state.hits = Some(hits);
                StageOutcome::Advance(state)
            }
            Err(Error::ReferenceNotFound(_)) => {
                state.hits = Some(Vec::new());
                StageOutcome::Advance(state)
            }
            Err(e) => StageOutcome::Fatal(e),
        }
    }

    /// Stage 3: deliver results to the callback URL. Failures are
    /// retryable; exhausting retries surfaces as a permanently failed
    /// chain (best-effort delivery).
    async fn send_callback(&self, state: ChainState) -> StageOutcome {
        let hits = state.hits.clone().unwrap_or_default();
        match self
            .callback
            .deliver(
                &state.submission.callback_url,
                state.submission.track_id,
                &hits,
            )
            .await
        {
            Ok(()) => StageOutcome::Advance(state),
            Err(e) => StageOutcome::Fatal(e),
        }
    }

    /// Stage 4: best-effort temp file removal. A missing file is not an
    /// error, and nothing in this stage is ever fatal.
    async fn cleanup(&self, state: ChainState) -> StageOutcome {
        let file_path = &state.submission.file_path;
        match tokio::fs::remove_file(file_path).await {
            Ok(()) => info!(file = %file_path, "Temp file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %file_path, "Temp file already gone")
            }
            Err(e) => warn!(file = %file_path, error = %e, "Temp file removal failed"),
        }
        StageOutcome::Advance(state)
    }
}

/// Map a synchronous-path result from stage helpers for reuse by the
/// request handlers: extract an embedding for a temp file, storing it.
pub async fn extract_and_store(
    store: &Arc<dyn VectorStore>,
    extractor: &Arc<dyn EmbeddingExtractor>,
    file_path: &Path,
    track_id: Option<i64>,
    flags: InstrumentFlags,
) -> Result<Option<i64>> {
    let Some(vector) = extractor.extract(file_path).await? else {
        return Ok(None);
    };
    let id = store.insert(&vector, track_id, flags).await?;
    Ok(Some(id))
}
