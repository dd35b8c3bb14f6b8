//! Shared plumbing for the OpenAI-compatible HTTP clients.

use crate::error::VoiceError;
use std::time::Duration;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, VoiceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(VoiceError::Http)
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Turns a non-2xx response into an error built by `wrap`, keeping the
/// status and the head of the body.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    wrap: fn(String) -> VoiceError,
) -> Result<reqwest::Response, VoiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(wrap(format!("API error {}: {}", status, body)))
}
