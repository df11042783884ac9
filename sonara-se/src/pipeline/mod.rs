//! Asynchronous task pipeline
//!
//! One submission runs a chain of four ordered stages:
//! extract+store → find similar → send callback → cleanup. Each stage is
//! a discrete, independently retryable unit of work persisted in a
//! durable queue, so chains survive process restarts between stages.
//! Stage handoff is explicit and typed: the payload of each queue row is
//! the full chain state, advanced by each completed stage.

pub mod callback;
pub mod queue;
pub mod stages;
pub mod worker;

pub use callback::CallbackClient;
pub use queue::{TaskQueue, TaskRow};
pub use stages::{extract_and_store, StageOutcome, StageRunner};
pub use worker::{WorkerPool, WorkerSettings};

use serde::{Deserialize, Serialize};
use sonara_common::{Error, Result};

use crate::engine::SimilarityHit;

/// One async submission: what to process and where to report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSubmission {
    /// Audio file under the shared temp directory, deleted by Cleanup
    pub file_path: String,
    /// External track id, if the caller owns one
    pub track_id: Option<i64>,
    /// Result count for the similarity stage
    pub limit: usize,
    /// Base URL for result delivery
    pub callback_url: String,
    /// Instrument category indices to tag the stored embedding with
    pub instrument_types: Option<Vec<u8>>,
}

/// Ordered stages of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStage {
    ExtractStore,
    FindSimilar,
    SendCallback,
    Cleanup,
}

impl ChainStage {
    /// The stage that runs after this one, if any.
    pub fn next(self) -> Option<ChainStage> {
        match self {
            ChainStage::ExtractStore => Some(ChainStage::FindSimilar),
            ChainStage::FindSimilar => Some(ChainStage::SendCallback),
            ChainStage::SendCallback => Some(ChainStage::Cleanup),
            ChainStage::Cleanup => None,
        }
    }

    /// Stable name used in the queue table.
    pub fn as_str(self) -> &'static str {
        match self {
            ChainStage::ExtractStore => "extract_store",
            ChainStage::FindSimilar => "find_similar",
            ChainStage::SendCallback => "send_callback",
            ChainStage::Cleanup => "cleanup",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "extract_store" => Ok(ChainStage::ExtractStore),
            "find_similar" => Ok(ChainStage::FindSimilar),
            "send_callback" => Ok(ChainStage::SendCallback),
            "cleanup" => Ok(ChainStage::Cleanup),
            other => Err(Error::Internal(format!("unknown chain stage: {other}"))),
        }
    }
}

/// Typed output of the extract+store stage. `Failed` is a degraded
/// marker, not an error: downstream stages complete with empty results
/// instead of aborting the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractOutput {
    Stored { track_id: Option<i64> },
    Failed,
}

/// Full chain state carried stage to stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    pub submission: ChainSubmission,
    /// Output of ExtractStore, once it has run
    pub extract: Option<ExtractOutput>,
    /// Output of FindSimilar, once it has run
    pub hits: Option<Vec<SimilarityHit>>,
}

impl ChainState {
    pub fn new(submission: ChainSubmission) -> Self {
        Self {
            submission,
            extract: None,
            hits: None,
        }
    }
}

/// Enqueue the first stage of a new chain, returning the submission id.
pub async fn submit_chain(queue: &TaskQueue, submission: ChainSubmission) -> Result<String> {
    let submission_id = uuid::Uuid::new_v4().to_string();
    let state = ChainState::new(submission);
    queue
        .enqueue(&submission_id, ChainStage::ExtractStore, &state)
        .await?;
    tracing::info!(submission_id = %submission_id, "Chain submitted");
    Ok(submission_id)
}
