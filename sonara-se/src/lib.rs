//! sonara-se library interface
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::engine::{RecommendationResolver, SimilarityEngine};
use crate::extractor::{EmbeddingExtractor, EnergyContourExtractor};
use crate::pipeline::TaskQueue;
use crate::store::{SqliteVectorStore, VectorStore};

/// Uploads are raw audio bodies; allow up to 64 MiB.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Vector store adapter
    pub store: Arc<dyn VectorStore>,
    /// Embedding extractor
    pub extractor: Arc<dyn EmbeddingExtractor>,
    /// Similarity queries
    pub engine: SimilarityEngine,
    /// Recommendation resolution
    pub resolver: RecommendationResolver,
    /// Durable task queue for the async chain
    pub queue: TaskQueue,
    /// Resolved service configuration
    pub config: Arc<ServiceConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig) -> Self {
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(db.clone(), config.embedding_dim));
        let extractor: Arc<dyn EmbeddingExtractor> =
            Arc::new(EnergyContourExtractor::new(config.embedding_dim));
        let engine = SimilarityEngine::new(Arc::clone(&store), config.embedding_dim);
        let resolver = RecommendationResolver::new(Arc::clone(&store), engine.clone());
        let queue = TaskQueue::new(db.clone());
        Self {
            db,
            store,
            extractor,
            engine,
            resolver,
            queue,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }

    /// Swap in a different extractor (test doubles).
    pub fn with_extractor(mut self, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

/// Build application router
///
/// `/health` is public; everything under `/api` goes through the bearer
/// token check (a no-op when no token is configured).
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/track/process", post(api::track::process_audio))
        .route("/track/submit", post(api::track::submit_audio))
        .route("/track/batch", post(api::track::batch_process))
        .route("/track/extract", post(api::track::extract_only))
        .route("/track/:track_id/similar", get(api::track::similar_by_track))
        .route(
            "/track/similar-by-embedding",
            post(api::track::similar_by_embedding),
        )
        .route("/track/similar-by-audio", post(api::track::similar_by_audio))
        .route("/embedding/:id", get(api::track::embedding_by_id))
        .route("/recommend", post(api::recommend::recommend))
        .route("/recommend/batch", post(api::recommend::recommend_batch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_bearer,
        ));

    Router::new()
        .merge(api::health::health_routes())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
