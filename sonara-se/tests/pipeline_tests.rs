//! End-to-end chain tests: durable queue, stage execution, callback
//! delivery, and temp file cleanup, driven deterministically through
//! `process_next` instead of the polling workers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use sonara_common::{Error, InstrumentFlags, Result};
use sonara_se::db::init_database_pool;
use sonara_se::engine::SimilarityEngine;
use sonara_se::extractor::EmbeddingExtractor;
use sonara_se::pipeline::worker::process_next;
use sonara_se::pipeline::{
    submit_chain, CallbackClient, ChainSubmission, StageRunner, TaskQueue, WorkerSettings,
};
use sonara_se::store::{SqliteVectorStore, VectorStore};

const DIM: usize = 4;

/// Extractor double producing a fixed vector for any input file.
struct FixedExtractor(Vec<f32>);

#[async_trait]
impl EmbeddingExtractor for FixedExtractor {
    async fn extract(&self, _audio_path: &Path) -> Result<Option<Vec<f32>>> {
        Ok(Some(self.0.clone()))
    }
    fn dim(&self) -> usize {
        self.0.len()
    }
}

/// Extractor double for undecodable audio.
struct EmptyExtractor;

#[async_trait]
impl EmbeddingExtractor for EmptyExtractor {
    async fn extract(&self, _audio_path: &Path) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }
    fn dim(&self) -> usize {
        DIM
    }
}

/// Extractor double for infrastructure failure.
struct BrokenExtractor;

#[async_trait]
impl EmbeddingExtractor for BrokenExtractor {
    async fn extract(&self, _audio_path: &Path) -> Result<Option<Vec<f32>>> {
        Err(Error::Internal("extractor backend unreachable".to_string()))
    }
    fn dim(&self) -> usize {
        DIM
    }
}

/// One captured callback request.
#[derive(Debug)]
struct Delivery {
    path: String,
    bearer: Option<String>,
    body: Value,
}

type DeliveryTx = mpsc::UnboundedSender<Delivery>;

async fn capture(
    State(tx): State<DeliveryTx>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let _ = tx.send(Delivery {
        path: uri.path().to_string(),
        bearer,
        body,
    });
    StatusCode::OK
}

/// Throwaway HTTP server that records every request it receives.
async fn spawn_receiver() -> (SocketAddr, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().fallback(capture).with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rx)
}

struct Harness {
    _dir: TempDir,
    dir_path: std::path::PathBuf,
    store: Arc<dyn VectorStore>,
    queue: TaskQueue,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("pipeline.db"))
        .await
        .unwrap();
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone(), DIM));
    let queue = TaskQueue::new(pool);
    let dir_path = dir.path().to_path_buf();
    Harness {
        _dir: dir,
        dir_path,
        store,
        queue,
    }
}

fn runner(store: &Arc<dyn VectorStore>, extractor: Arc<dyn EmbeddingExtractor>) -> StageRunner {
    let engine = SimilarityEngine::new(Arc::clone(store), DIM);
    let callback = CallbackClient::new("cb-secret".to_string()).unwrap();
    StageRunner::new(Arc::clone(store), extractor, engine, callback)
}

fn settings(max_attempts: u32, backoff: Duration) -> WorkerSettings {
    WorkerSettings {
        worker_count: 1,
        max_attempts,
        retry_backoff: backoff,
        poll_interval: Duration::from_millis(10),
    }
}

/// Run tasks until nothing is due. Tasks rescheduled into the future
/// stay queued.
async fn drain(queue: &TaskQueue, runner: &StageRunner, settings: &WorkerSettings) {
    while process_next(queue, runner, settings).await.unwrap() {}
}

fn audio_file(harness: &Harness, name: &str) -> std::path::PathBuf {
    let path = harness.dir_path.join(name);
    std::fs::write(&path, b"not really audio").unwrap();
    path
}

#[tokio::test]
async fn full_chain_delivers_hits_and_removes_file() {
    let hx = harness().await;
    // Neighbor at squared L2 distance 1 from the extracted vector.
    hx.store
        .insert(&[1.0, 1.0, 0.0, 0.0], Some(2), InstrumentFlags::default())
        .await
        .unwrap();

    let (addr, mut rx) = spawn_receiver().await;
    let file = audio_file(&hx, "upload.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(5),
        limit: 5,
        callback_url: format!("http://{addr}/callbacks"),
        instrument_types: Some(vec![1]),
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let runner = runner(&hx.store, Arc::new(FixedExtractor(vec![1.0, 0.0, 0.0, 0.0])));
    let settings = settings(3, Duration::from_secs(60));
    drain(&hx.queue, &runner, &settings).await;

    assert_eq!(hx.queue.pending_count().await.unwrap(), 0);
    assert!(!file.exists(), "cleanup stage should remove the upload");

    let delivery = rx.try_recv().expect("callback should have been delivered");
    assert_eq!(delivery.path, "/callbacks/5");
    assert_eq!(delivery.bearer.as_deref(), Some("cb-secret"));
    assert_eq!(delivery.body["code"], "SU");
    let hits = delivery.body["payload"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["track_id"], 2);
    assert_eq!(hits[0]["similarity"], 0.5);
}

#[tokio::test]
async fn failed_extraction_still_completes_with_empty_results() {
    let hx = harness().await;
    let (addr, mut rx) = spawn_receiver().await;
    let file = audio_file(&hx, "garbage.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(9),
        limit: 5,
        callback_url: format!("http://{addr}/callbacks"),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let runner = runner(&hx.store, Arc::new(EmptyExtractor));
    let settings = settings(3, Duration::from_secs(60));
    drain(&hx.queue, &runner, &settings).await;

    assert_eq!(hx.queue.pending_count().await.unwrap(), 0);
    assert!(!file.exists());

    // The chain degrades instead of aborting: the caller still hears
    // back, with an empty hit list.
    let delivery = rx.try_recv().expect("degraded chain still calls back");
    assert_eq!(delivery.path, "/callbacks/9");
    assert_eq!(delivery.body["code"], "SU");
    assert_eq!(delivery.body["payload"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn submission_without_track_id_reports_empty_results() {
    let hx = harness().await;
    hx.store
        .insert(&[1.0, 1.0, 0.0, 0.0], Some(2), InstrumentFlags::default())
        .await
        .unwrap();

    let (addr, mut rx) = spawn_receiver().await;
    let file = audio_file(&hx, "anon.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: None,
        limit: 5,
        callback_url: format!("http://{addr}/callbacks"),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let runner = runner(&hx.store, Arc::new(FixedExtractor(vec![1.0, 0.0, 0.0, 0.0])));
    let settings = settings(3, Duration::from_secs(60));
    drain(&hx.queue, &runner, &settings).await;

    let delivery = rx.try_recv().unwrap();
    // No track id in the path, no hits in the payload.
    assert_eq!(delivery.path, "/callbacks");
    assert_eq!(delivery.body["payload"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn transient_failure_is_rescheduled_with_backoff() {
    let hx = harness().await;
    let file = audio_file(&hx, "retry.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(1),
        limit: 5,
        callback_url: "http://127.0.0.1:1/unreachable".to_string(),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let runner = runner(&hx.store, Arc::new(BrokenExtractor));
    let settings = settings(3, Duration::from_secs(60));

    assert!(process_next(&hx.queue, &runner, &settings).await.unwrap());
    // The retry sits a minute in the future; nothing is due now.
    assert!(!process_next(&hx.queue, &runner, &settings).await.unwrap());
    assert_eq!(hx.queue.pending_count().await.unwrap(), 1);
    assert_eq!(hx.queue.status(1).await.unwrap().as_deref(), Some("queued"));
}

#[tokio::test]
async fn validation_errors_fail_immediately_without_retries() {
    let hx = harness().await;
    let (addr, mut rx) = spawn_receiver().await;
    let file = audio_file(&hx, "wrongdim.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(1),
        limit: 5,
        callback_url: format!("http://{addr}/callbacks"),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    // Extractor output does not match the store dimension, so the
    // insert fails with a validation-class error.
    let runner = runner(&hx.store, Arc::new(FixedExtractor(vec![1.0, 0.0])));
    let settings = settings(3, Duration::from_secs(60));
    drain(&hx.queue, &runner, &settings).await;

    // Not rescheduled: the stage is failed on the first attempt even
    // though two more attempts were allowed.
    assert_eq!(hx.queue.status(1).await.unwrap().as_deref(), Some("failed"));
    assert_eq!(hx.queue.pending_count().await.unwrap(), 0);
    assert!(!file.exists(), "cleanup still runs after a validation failure");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn stage_handoff_completes_and_enqueues_atomically() {
    let hx = harness().await;
    let file = audio_file(&hx, "handoff.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(1),
        limit: 5,
        callback_url: "http://127.0.0.1:1/unreachable".to_string(),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let claimed = hx.queue.claim_due().await.unwrap().unwrap();
    let next_id = hx
        .queue
        .complete_and_enqueue(
            claimed.id,
            &claimed.submission_id,
            claimed.stage.next(),
            &claimed.state,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        hx.queue.status(claimed.id).await.unwrap().as_deref(),
        Some("done")
    );
    let successor = hx.queue.claim_due().await.unwrap().unwrap();
    assert_eq!(successor.id, next_id);
    assert_eq!(successor.stage, claimed.stage.next().unwrap());

    // A terminal stage completes without enqueueing anything.
    let end = hx
        .queue
        .complete_and_enqueue(successor.id, &successor.submission_id, None, &successor.state)
        .await
        .unwrap();
    assert!(end.is_none());
    assert_eq!(hx.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_retries_fail_the_stage_but_still_clean_up() {
    let hx = harness().await;
    let (addr, mut rx) = spawn_receiver().await;
    let file = audio_file(&hx, "doomed.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(1),
        limit: 5,
        callback_url: format!("http://{addr}/callbacks"),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    let runner = runner(&hx.store, Arc::new(BrokenExtractor));
    // Single attempt: the first fatal outcome is terminal.
    let settings = settings(1, Duration::from_secs(60));
    drain(&hx.queue, &runner, &settings).await;

    assert_eq!(hx.queue.status(1).await.unwrap().as_deref(), Some("failed"));
    assert_eq!(hx.queue.pending_count().await.unwrap(), 0);
    // Cleanup ran even though the chain died before delivery.
    assert!(!file.exists());
    assert!(rx.try_recv().is_err(), "no callback after a dead chain");
}

#[tokio::test]
async fn stale_running_tasks_are_requeued_at_startup() {
    let hx = harness().await;
    let file = audio_file(&hx, "stale.audio");
    let submission = ChainSubmission {
        file_path: file.to_string_lossy().into_owned(),
        track_id: Some(1),
        limit: 5,
        callback_url: "http://127.0.0.1:1/unreachable".to_string(),
        instrument_types: None,
    };
    submit_chain(&hx.queue, submission).await.unwrap();

    // Simulate a crash mid-task: claimed but never completed.
    let claimed = hx.queue.claim_due().await.unwrap().unwrap();
    assert_eq!(
        hx.queue.status(claimed.id).await.unwrap().as_deref(),
        Some("running")
    );

    let requeued = hx.queue.requeue_stale().await.unwrap();
    assert_eq!(requeued, 1);
    assert_eq!(
        hx.queue.status(claimed.id).await.unwrap().as_deref(),
        Some("queued")
    );
    assert!(hx.queue.claim_due().await.unwrap().is_some());
}
