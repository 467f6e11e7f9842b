//! Client for the custom completion server.
//!
//! Wire contract:
//! - `POST {base_url}/query` with `{prompt, max_tokens, temperature, top_p, stop}`
//!   answers `{"response": "..."}`
//! - `GET {base_url}/health` answers `{"status": "ok" | "warning", "model"?, "message"?}`

use crate::config::{build_http_client, trim_base_url, BackendSettings};
use crate::http::{map_transport_error, read_json};
use crate::traits::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    response: Option<String>,
}

/// Reply of the server's health endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerHealth {
    pub fn is_ready(&self) -> bool {
        self.status == "ok"
    }
}

pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiBackend {
    pub fn new(base_url: &str, settings: &BackendSettings) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_http_client(settings)?,
            base_url: trim_base_url(base_url),
            timeout: settings.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<ServerHealth, BackendError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;
        read_json(response, self.timeout).await
    }
}

#[async_trait]
impl Backend for ApiBackend {
    fn name(&self) -> &str {
        "api"
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult {
        let request = CompletionRequest::new(prompt, options)?;
        let url = format!("{}/query", self.base_url);

        let payload = QueryRequest {
            prompt: request.prompt,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            stop: request
                .options
                .stop_sequences
                .iter()
                .map(String::as_str)
                .collect(),
        };

        debug!(url = %url, prompt_len = prompt.len(), "Sending completion request");
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let parsed: QueryResponse = read_json(response, self.timeout).await?;
        let text = parsed.response.ok_or_else(|| {
            BackendError::InvalidResponse("Response is missing the 'response' field".to_string())
        })?;

        let latency = started.elapsed();
        debug!(latency_ms = latency.as_millis() as u64, "Completion received");

        Ok(Completion {
            text,
            tokens: None,
            latency,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_query_payload_shape() {
        let options = GenerationOptions::default()
            .with_max_tokens(32)
            .with_stop("\n\n");
        let payload = QueryRequest {
            prompt: "hi",
            max_tokens: options.max_tokens,
            temperature: None,
            top_p: None,
            stop: options.stop_sequences.iter().map(String::as_str).collect(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["prompt"], "hi");
        assert_eq!(json["max_tokens"], 32);
        assert_eq!(json["stop"][0], "\n\n");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_base_url_trimmed() {
        let backend = ApiBackend::new("http://localhost:8760/", &BackendSettings::default()).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8760");
    }
}
