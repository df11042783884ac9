//! Recommendation endpoints
//!
//! These serve the catalog backend, so the request DTOs keep its
//! camelCase field names on the wire.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sonara_common::{ApiResponse, InstrumentKind};
use std::collections::HashMap;
use tracing::info;

use crate::engine::SimilarityHit;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest {
    /// Instrument category indices the recommended track must cover
    #[serde(default)]
    pub need_instrument_types: Vec<u8>,
    /// Reference tracks the result should sound like
    #[serde(default)]
    pub track_ids: Vec<i64>,
}

/// POST /api/recommend
///
/// Pick one stored track similar to the references and matching the
/// instrument requirement. `track_id` in the payload is null when no
/// candidate qualifies.
pub async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    let mut required = Vec::with_capacity(request.need_instrument_types.len());
    for index in &request.need_instrument_types {
        required.push(InstrumentKind::from_index(*index)?);
    }

    let winner = state
        .resolver
        .recommend(&required, &request.track_ids)
        .await?;
    info!(
        references = request.track_ids.len(),
        winner = ?winner,
        "Recommendation resolved"
    );
    Ok(Json(ApiResponse::success(json!({ "track_id": winner }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendBatchRequest {
    pub track_ids: Vec<i64>,
    pub limit: Option<usize>,
}

/// POST /api/recommend/batch
///
/// Similarity lists for many reference tracks in one call. Every
/// requested id is a key in the payload; ids that fail map to empty
/// lists.
pub async fn recommend_batch(
    State(state): State<AppState>,
    Json(request): Json<RecommendBatchRequest>,
) -> ApiResult<Json<ApiResponse<HashMap<i64, Vec<SimilarityHit>>>>> {
    let limit = request.limit.unwrap_or(crate::engine::DEFAULT_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let results = state
        .resolver
        .recommend_batch(&request.track_ids, limit)
        .await;
    Ok(Json(ApiResponse::success(results)))
}
