//! Transport helpers shared by the API and Ollama backends.

use crate::traits::BackendError;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) fn map_transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        BackendError::Unreachable(err.to_string())
    } else if err.is_decode() || err.is_body() {
        BackendError::InvalidResponse(err.to_string())
    } else {
        BackendError::Unreachable(err.to_string())
    }
}

/// Reads the body of a response, rejecting non-2xx statuses and malformed JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<T, BackendError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_transport_error(e, timeout))?;

    if !status.is_success() {
        return Err(BackendError::InvalidResponse(format!(
            "HTTP {}: {}",
            status,
            truncate(&body, 512)
        )));
    }

    serde_json::from_str(&body).map_err(|e| {
        BackendError::InvalidResponse(format!(
            "Failed to parse response ({}): {}",
            e,
            truncate(&body, 256)
        ))
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
