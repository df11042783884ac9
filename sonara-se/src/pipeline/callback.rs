//! Outbound callback delivery
//!
//! Results are POSTed to the caller-supplied URL wrapped in the standard
//! response envelope, with a bearer credential and a bounded timeout.
//! Delivery is best-effort: failures surface as errors so the pipeline's
//! retry policy applies, and exhausted retries end the chain without
//! further notification.

use sonara_common::{ApiResponse, Error, Result};
use std::time::Duration;
use tracing::info;

use crate::engine::SimilarityHit;

/// Timeout for one callback attempt.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for result delivery.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: reqwest::Client,
    token: String,
}

impl CallbackClient {
    pub fn new(token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("callback client init failed: {e}")))?;
        Ok(Self { http, token })
    }

    /// Deliver a hit list to `callback_url` (`{url}/{track_id}` when a
    /// track id is present). Non-2xx responses and network failures are
    /// errors so the surrounding scheduler can retry.
    pub async fn deliver(
        &self,
        callback_url: &str,
        track_id: Option<i64>,
        hits: &[SimilarityHit],
    ) -> Result<()> {
        let target = target_url(callback_url, track_id);

        let body = ApiResponse::success(hits.to_vec());
        let response = self
            .http
            .post(&target)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("callback request to {target} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Internal(format!(
                "callback to {target} returned status {status}"
            )));
        }

        info!(target = %target, hits = hits.len(), status = %status, "Callback delivered");
        Ok(())
    }
}

/// Delivery target: `{url}/{track_id}` when a track id is present, the
/// bare URL otherwise.
fn target_url(callback_url: &str, track_id: Option<i64>) -> String {
    match track_id {
        Some(id) => format!("{}/{}", callback_url.trim_end_matches('/'), id),
        None => callback_url.to_string(),
    }
}
