//! Track processing and similarity endpoints
//!
//! Upload endpoints take the raw audio bytes as the request body and
//! carry everything else in query parameters. Uploaded files land under
//! the shared audio directory with a generated name; synchronous
//! endpoints delete theirs before responding, the async chain leaves
//! deletion to its Cleanup stage.

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sonara_common::{ApiResponse, InstrumentFlags, InstrumentKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{SimilarityHit, DEFAULT_LIMIT};
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{self, extract_and_store, ChainSubmission};
use crate::AppState;

const MAX_LIMIT: usize = 100;

/// Parse a comma-separated instrument index list ("1,3") into validated
/// indices. `None` and the empty string both mean "untagged".
fn parse_instrument_csv(raw: Option<&str>) -> ApiResult<Option<Vec<u8>>> {
    let Some(raw) = raw else { return Ok(None) };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let mut indices = Vec::new();
    for part in raw.split(',') {
        let index: u8 = part
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid instrument index: {part}")))?;
        InstrumentKind::from_index(index)?;
        indices.push(index);
    }
    Ok(Some(indices))
}

fn flags_from_indices(indices: Option<&[u8]>) -> ApiResult<InstrumentFlags> {
    match indices {
        Some(indices) => Ok(InstrumentFlags::from_indices(indices)?),
        None => Ok(InstrumentFlags::default()),
    }
}

fn validate_limit(limit: Option<usize>) -> ApiResult<usize> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

/// Write an uploaded body to a uniquely named file under the shared
/// audio directory.
async fn persist_upload(state: &AppState, body: &Bytes) -> ApiResult<PathBuf> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty request body".to_string()));
    }
    tokio::fs::create_dir_all(&state.config.shared_audio_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot create audio directory: {e}")))?;
    let path = state
        .config
        .shared_audio_dir
        .join(format!("{}.audio", Uuid::new_v4()));
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot persist upload: {e}")))?;
    Ok(path)
}

async fn discard_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete uploaded file");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub track_id: Option<i64>,
    pub instrument_types: Option<String>,
}

/// POST /api/track/process
///
/// Synchronous variant: extract an embedding from the uploaded audio,
/// store it, answer with the new record id.
pub async fn process_audio(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Value>>> {
    let indices = parse_instrument_csv(params.instrument_types.as_deref())?;
    let flags = flags_from_indices(indices.as_deref())?;

    let path = persist_upload(&state, &body).await?;
    let outcome = extract_and_store(
        &state.store,
        &state.extractor,
        &path,
        params.track_id,
        flags,
    )
    .await;
    discard_upload(&path).await;

    match outcome {
        Ok(Some(id)) => {
            info!(id, track_id = ?params.track_id, "Stored embedding");
            Ok(Json(ApiResponse::success(json!({
                "id": id,
                "track_id": params.track_id,
            }))))
        }
        Ok(None) => Err(ApiError::Internal(
            "audio could not be decoded into an embedding".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    pub track_id: Option<i64>,
    pub limit: Option<usize>,
    pub callback_url: String,
    pub instrument_types: Option<String>,
}

/// POST /api/track/submit
///
/// Asynchronous variant: persist the upload, enqueue the processing
/// chain, answer immediately with the submission id. Results arrive at
/// the callback URL once the chain reaches its delivery stage.
pub async fn submit_audio(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Value>>> {
    if params.callback_url.trim().is_empty() {
        return Err(ApiError::BadRequest("callback_url is required".to_string()));
    }
    let limit = validate_limit(params.limit)?;
    let indices = parse_instrument_csv(params.instrument_types.as_deref())?;

    let path = persist_upload(&state, &body).await?;
    let submission = ChainSubmission {
        file_path: path.to_string_lossy().into_owned(),
        track_id: params.track_id,
        limit,
        callback_url: params.callback_url.clone(),
        instrument_types: indices,
    };
    let submission_id = pipeline::submit_chain(&state.queue, submission).await?;
    info!(%submission_id, track_id = ?params.track_id, "Accepted async submission");

    Ok(Json(ApiResponse::success(json!({
        "submission_id": submission_id,
    }))))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// GET /api/track/:track_id/similar
pub async fn similar_by_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<i64>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ApiResponse<Vec<SimilarityHit>>>> {
    let limit = validate_limit(params.limit)?;
    let hits = state.engine.find_by_track_id(track_id, limit).await?;
    Ok(Json(ApiResponse::success(hits)))
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingQuery {
    pub embedding: Vec<f32>,
    pub limit: Option<usize>,
}

/// POST /api/track/similar-by-embedding
pub async fn similar_by_embedding(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingQuery>,
) -> ApiResult<Json<ApiResponse<Vec<SimilarityHit>>>> {
    let limit = validate_limit(request.limit)?;
    let hits = state
        .engine
        .find_by_vector(&request.embedding, limit, None)
        .await?
        .into_iter()
        .map(|hit| hit.rounded())
        .collect();
    Ok(Json(ApiResponse::success(hits)))
}

/// POST /api/track/similar-by-audio
///
/// Extract an embedding from the uploaded audio without storing it, then
/// query for neighbors. The upload is deleted before responding.
pub async fn similar_by_audio(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Vec<SimilarityHit>>>> {
    let limit = validate_limit(params.limit)?;
    let path = persist_upload(&state, &body).await?;
    let extracted = state.extractor.extract(&path).await;
    discard_upload(&path).await;

    let vector = match extracted {
        Ok(Some(vector)) => vector,
        Ok(None) => {
            return Err(ApiError::Internal(
                "audio could not be decoded into an embedding".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    let hits = state
        .engine
        .find_by_vector(&vector, limit, None)
        .await?
        .into_iter()
        .map(|hit| hit.rounded())
        .collect();
    Ok(Json(ApiResponse::success(hits)))
}

/// POST /api/track/extract
///
/// Extract and return the raw embedding without touching the store.
pub async fn extract_only(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Vec<f32>>>> {
    let path = persist_upload(&state, &body).await?;
    let extracted = state.extractor.extract(&path).await;
    discard_upload(&path).await;

    match extracted {
        Ok(Some(vector)) => Ok(Json(ApiResponse::success(vector))),
        Ok(None) => Err(ApiError::Internal(
            "audio could not be decoded into an embedding".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/embedding/:id
pub async fn embedding_by_id(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<ApiResponse<Vec<f32>>>> {
    match state.store.record_by_id(id).await? {
        Some(record) => Ok(Json(ApiResponse::success(record.vector))),
        None => Err(ApiError::NotFound(format!("no embedding with id {id}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    pub track_id: Option<i64>,
    pub instrument_types: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, BatchEntry>,
}

/// POST /api/track/batch
///
/// Process already-staged files from the shared audio directory. The
/// whole request is validated before any file is touched: every path
/// must carry a metadata entry with valid instrument indices. Per-file
/// extraction failures after that point do not abort the batch; the
/// failed path maps to null in the result.
pub async fn batch_process(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<ApiResponse<Value>>> {
    if request.file_paths.is_empty() {
        return Err(ApiError::BadRequest("file_paths must not be empty".to_string()));
    }

    // Fail-fast validation pass before any processing starts.
    let mut plan: Vec<(&String, &BatchEntry, InstrumentFlags)> = Vec::new();
    for path in &request.file_paths {
        let entry = request.metadata.get(path).ok_or_else(|| {
            ApiError::BadRequest(format!("missing metadata for file: {path}"))
        })?;
        let flags = flags_from_indices(entry.instrument_types.as_deref())?;
        plan.push((path, entry, flags));
    }

    let mut results: HashMap<String, Option<i64>> = HashMap::new();
    let mut processed = 0usize;
    for (path, entry, flags) in plan {
        let stored = match extract_and_store(
            &state.store,
            &state.extractor,
            Path::new(path),
            entry.track_id,
            flags,
        )
        .await
        {
            Ok(Some(id)) => {
                processed += 1;
                Some(id)
            }
            Ok(None) => {
                warn!(path, "Batch file produced no embedding");
                None
            }
            Err(e) => {
                warn!(path, error = %e, "Batch file failed to process");
                None
            }
        };
        results.insert(path.clone(), stored);
    }

    let total = request.file_paths.len();
    info!(processed, total, "Batch processing complete");
    Ok(Json(ApiResponse::success(json!({
        "message": format!("{processed} of {total} files processed"),
        "results": results,
    }))))
}
