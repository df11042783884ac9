//! HTTP surface tests: a real listener, real requests, envelope and
//! auth behavior checked end to end.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use sonara_common::Result;
use sonara_se::config::ServiceConfig;
use sonara_se::db::init_database_pool;
use sonara_se::extractor::EmbeddingExtractor;
use sonara_se::{build_router, AppState};

const DIM: usize = 4;
const TOKEN: &str = "test-api-token";

/// Extractor double: embeds the first byte of the file so different
/// uploads land at different points.
struct ByteExtractor;

#[async_trait]
impl EmbeddingExtractor for ByteExtractor {
    async fn extract(&self, audio_path: &Path) -> Result<Option<Vec<f32>>> {
        let bytes = tokio::fs::read(audio_path).await?;
        match bytes.first() {
            Some(&b) => Ok(Some(vec![f32::from(b), 0.0, 0.0, 0.0])),
            None => Ok(None),
        }
    }
    fn dim(&self) -> usize {
        DIM
    }
}

struct Server {
    dir: TempDir,
    addr: SocketAddr,
    client: reqwest::Client,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn spawn_server() -> Server {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("api.db")).await.unwrap();

    let config = ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: dir.path().join("api.db"),
        embedding_dim: DIM,
        shared_audio_dir: dir.path().join("audio"),
        callback_token: "cb".to_string(),
        api_token: Some(TOKEN.to_string()),
        worker_count: 1,
        max_attempts: 3,
        retry_backoff: Duration::from_secs(5),
    };
    let state = AppState::new(pool, config).with_extractor(Arc::new(ByteExtractor));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        dir,
        addr,
        client: reqwest::Client::new(),
    }
}

/// Store one embedding through the API, seeded from `seed`.
async fn store_track(server: &Server, track_id: i64, seed: u8) {
    let response = server
        .client
        .post(server.url(&format!("/api/track/process?track_id={track_id}")))
        .bearer_auth(TOKEN)
        .body(vec![seed])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn health_is_public() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "sonara-se");
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let server = spawn_server().await;

    let unauthorized = server
        .client
        .post(server.url("/api/recommend"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);
    let body: Value = unauthorized.json().await.unwrap();
    assert_eq!(body["code"], "UNA");

    let wrong_token = server
        .client
        .post(server.url("/api/recommend"))
        .bearer_auth("nope")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_token.status(), 401);
}

#[tokio::test]
async fn process_then_query_similar() {
    let server = spawn_server().await;
    store_track(&server, 1, 10).await;
    store_track(&server, 2, 11).await;
    store_track(&server, 3, 30).await;

    let response = server
        .client
        .get(server.url("/api/track/1/similar?limit=5"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SU");
    let hits = body["payload"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    // Track 2 (seed 11) is far closer to track 1 (seed 10) than track 3.
    assert_eq!(hits[0]["track_id"], 2);
    assert_eq!(hits[0]["similarity"], 0.5);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/track/process"))
        .bearer_auth(TOKEN)
        .body(Vec::<u8>::new())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "BR");
}

#[tokio::test]
async fn unknown_embedding_id_is_not_found() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/api/embedding/999"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NFP");
}

#[tokio::test]
async fn wrong_dimension_vector_is_bad_request() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/track/similar-by-embedding"))
        .bearer_auth(TOKEN)
        .json(&json!({ "embedding": [1.0, 2.0] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "BR");
}

#[tokio::test]
async fn recommend_uses_camel_case_request() {
    let server = spawn_server().await;
    store_track(&server, 1, 10).await;
    store_track(&server, 2, 12).await;

    let response = server
        .client
        .post(server.url("/api/recommend"))
        .bearer_auth(TOKEN)
        .json(&json!({ "needInstrumentTypes": [], "trackIds": [1] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SU");
    assert_eq!(body["payload"]["track_id"], 2);
}

#[tokio::test]
async fn recommend_batch_with_no_track_ids_is_an_empty_mapping() {
    let server = spawn_server().await;
    store_track(&server, 1, 10).await;

    let response = server
        .client
        .post(server.url("/api/recommend/batch"))
        .bearer_auth(TOKEN)
        .json(&json!({ "trackIds": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SU");
    assert_eq!(body["payload"], json!({}));
}

#[tokio::test]
async fn recommend_with_unknown_instrument_index_is_bad_request() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/recommend"))
        .bearer_auth(TOKEN)
        .json(&json!({ "needInstrumentTypes": [9], "trackIds": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn batch_fails_fast_on_missing_metadata() {
    let server = spawn_server().await;
    let staged = server.dir.path().join("staged.audio");
    std::fs::write(&staged, [42u8]).unwrap();
    let path = staged.to_string_lossy().into_owned();

    let response = server
        .client
        .post(server.url("/api/track/batch"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "file_paths": [path.as_str(), "unlisted.audio"],
            "metadata": {
                path.as_str(): { "track_id": 7 }
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "BR");
}

#[tokio::test]
async fn batch_processes_listed_files() {
    let server = spawn_server().await;
    let staged = server.dir.path().join("batch.audio");
    std::fs::write(&staged, [42u8]).unwrap();
    let path = staged.to_string_lossy().into_owned();

    let response = server
        .client
        .post(server.url("/api/track/batch"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "file_paths": [path.as_str()],
            "metadata": {
                path.as_str(): { "track_id": 7, "instrument_types": [1, 4] }
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SU");
    assert_eq!(body["payload"]["message"], "1 of 1 files processed");
    assert!(body["payload"]["results"][&path].is_i64());
}

#[tokio::test]
async fn submit_accepts_and_reports_submission_id() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/track/submit?track_id=4&callback_url=http://127.0.0.1:1/cb"))
        .bearer_auth(TOKEN)
        .body(vec![9u8])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SU");
    assert!(body["payload"]["submission_id"].is_string());
}

#[tokio::test]
async fn submit_without_callback_url_is_bad_request() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/track/submit?track_id=4"))
        .bearer_auth(TOKEN)
        .body(vec![9u8])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
