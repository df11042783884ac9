//! Worker pool
//!
//! N independent tokio tasks poll the durable queue, claim one due task
//! at a time, and drive the chain forward. Within one submission, stage
//! n+1 is only enqueued after stage n reaches a terminal state, so stages
//! of a chain never run concurrently; across submissions, chains
//! interleave freely.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sonara_common::Result;

use super::{ChainStage, StageOutcome, StageRunner, TaskQueue, TaskRow};

/// Scheduling knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum attempts per stage before terminal failure
    pub max_attempts: u32,
    /// Base backoff between retries (doubles per attempt)
    pub retry_backoff: Duration,
    /// Queue poll interval when idle
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Pool of queue-driven pipeline workers.
pub struct WorkerPool {
    queue: TaskQueue,
    runner: Arc<StageRunner>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(queue: TaskQueue, runner: StageRunner, settings: WorkerSettings) -> Self {
        Self {
            queue,
            runner: Arc::new(runner),
            settings,
        }
    }

    /// Spawn the worker tasks. Handles are returned so the caller owns
    /// their lifecycle; workers run until the process shuts down.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        (0..self.settings.worker_count)
            .map(|index| {
                let queue = self.queue.clone();
                let runner = Arc::clone(&self.runner);
                let settings = self.settings.clone();
                tokio::spawn(async move {
                    info!(worker = index, "Pipeline worker started");
                    loop {
                        match process_next(&queue, &runner, &settings).await {
                            Ok(true) => {} // claimed and ran a task; poll again immediately
                            Ok(false) => tokio::time::sleep(settings.poll_interval).await,
                            Err(e) => {
                                error!(worker = index, error = %e, "Worker iteration failed");
                                tokio::time::sleep(settings.poll_interval).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Claim and execute at most one due task. Returns whether a task ran.
///
/// Factored out of the worker loop so tests can drive the queue
/// deterministically.
pub async fn process_next(
    queue: &TaskQueue,
    runner: &StageRunner,
    settings: &WorkerSettings,
) -> Result<bool> {
    let Some(task) = queue.claim_due().await? else {
        return Ok(false);
    };
    execute(queue, runner, settings, task).await?;
    Ok(true)
}

async fn execute(
    queue: &TaskQueue,
    runner: &StageRunner,
    settings: &WorkerSettings,
    task: TaskRow,
) -> Result<()> {
    let TaskRow {
        id,
        submission_id,
        stage,
        state,
        attempts,
    } = task;
    // Retained so a permanently failed stage can still hand its file to
    // Cleanup.
    let state_at_entry = state.clone();

    match runner.run(stage, state).await {
        StageOutcome::Advance(state) => {
            advance(queue, id, &submission_id, stage, &state).await?;
        }
        StageOutcome::Degraded(state, reason) => {
            warn!(
                submission_id = %submission_id,
                stage = stage.as_str(),
                reason = %reason,
                "Stage degraded; chain continues"
            );
            advance(queue, id, &submission_id, stage, &state).await?;
        }
        StageOutcome::Fatal(e) => {
            let attempts = attempts + 1;
            // Only transient infrastructure failures earn a retry;
            // validation-class errors fail the stage immediately.
            if e.is_retryable() && attempts < settings.max_attempts {
                // Exponential backoff: base * 2^(attempts-1)
                let delay = settings.retry_backoff * 2u32.pow(attempts - 1);
                warn!(
                    submission_id = %submission_id,
                    stage = stage.as_str(),
                    attempts,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Stage failed; retrying"
                );
                queue.retry_later(id, attempts, delay, &e.to_string()).await?;
            } else {
                error!(
                    submission_id = %submission_id,
                    stage = stage.as_str(),
                    attempts,
                    error = %e,
                    "Stage failed permanently"
                );
                queue.fail(id, &e.to_string()).await?;
                // File cleanup is prioritized over delivery ordering: a
                // permanently failed stage still gets its temp file
                // removed.
                if stage != ChainStage::Cleanup {
                    queue
                        .enqueue(&submission_id, ChainStage::Cleanup, &state_at_entry)
                        .await?;
                }
            }
        }
    }
    Ok(())
}

/// Complete the current stage and enqueue the next one atomically.
async fn advance(
    queue: &TaskQueue,
    task_id: i64,
    submission_id: &str,
    stage: ChainStage,
    state: &super::ChainState,
) -> Result<()> {
    let next = stage.next();
    queue
        .complete_and_enqueue(task_id, submission_id, next, state)
        .await?;
    if next.is_none() {
        info!(submission_id = %submission_id, "Chain complete");
    }
    Ok(())
}
