//! Ollama backend.
//!
//! Wire contract:
//! - `GET  {host}/api/tags`      -> `{"models": [{"name": "llama3:latest"}, ...]}`
//! - `GET  {host}/api/version`   -> `{"version": "0.1.32"}`
//! - `POST {host}/api/generate`  `{model, prompt, stream: false, options}` -> `{response, done, eval_count?}`
//! - `POST {host}/api/chat`      `{model, messages, stream: false, options}` -> `{message: {content}}`
//!
//! `/api/chat` is only used when the server does not expose `/api/generate`.

use crate::config::{build_http_client, trim_base_url, BackendSettings};
use crate::http::{map_transport_error, read_json};
use crate::traits::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
}

impl<'a> From<&'a GenerationOptions> for OllamaOptions<'a> {
    fn from(options: &'a GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            num_predict: options.max_tokens,
            stop: options.stop_sequences.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
    model_name: String,
    timeout: Duration,
    model_checked: OnceCell<()>,
}

impl OllamaBackend {
    pub fn new(
        host: &str,
        model_name: &str,
        settings: &BackendSettings,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_http_client(settings)?,
            host: trim_base_url(host),
            model_name: model_name.trim().to_string(),
            timeout: settings.request_timeout,
            model_checked: OnceCell::new(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn version(&self) -> Result<String, BackendError> {
        let url = format!("{}/api/version", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;
        let parsed: VersionResponse = read_json(response, self.timeout).await?;
        Ok(parsed.version)
    }

    /// Names of the models the server has pulled, sorted.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;
        let parsed: TagsResponse = read_json(response, self.timeout).await?;

        let mut models: Vec<String> = parsed.models.into_iter().map(|m| m.name).collect();
        models.sort();
        models.dedup();
        Ok(models)
    }

    /// Confirms the configured model exists. Success is remembered; failures are not.
    pub async fn ensure_model(&self) -> Result<(), BackendError> {
        self.model_checked
            .get_or_try_init(|| async {
                let available = self.list_models().await?;
                if model_available(&available, &self.model_name) {
                    info!(model = %self.model_name, "Ollama model available");
                    Ok(())
                } else {
                    Err(BackendError::ModelError {
                        message: format!(
                            "Model '{}' is not available on {}",
                            self.model_name, self.host
                        ),
                        available_models: available,
                    })
                }
            })
            .await
            .map(|_| ())
    }

    async fn generate(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<Option<(String, Option<u32>)>, BackendError> {
        let url = format!("{}/api/generate", self.host);
        let body = json!({
            "model": self.model_name,
            "prompt": request.prompt,
            "stream": false,
            "options": OllamaOptions::from(request.options),
        });

        debug!(url = %url, model = %self.model_name, "Sending generate request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed: GenerateResponse = read_json(response, self.timeout).await?;
        if let Some(error) = parsed.error {
            return Err(BackendError::model(error));
        }
        let text = parsed.response.ok_or_else(|| {
            BackendError::InvalidResponse("Generate response is missing 'response'".to_string())
        })?;
        Ok(Some((text, parsed.eval_count)))
    }

    async fn chat(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<(String, Option<u32>), BackendError> {
        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": self.model_name,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": false,
            "options": OllamaOptions::from(request.options),
        });

        debug!(url = %url, model = %self.model_name, "Sending chat request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let parsed: ChatResponse = read_json(response, self.timeout).await?;
        if let Some(error) = parsed.error {
            return Err(BackendError::model(error));
        }
        let message = parsed.message.ok_or_else(|| {
            BackendError::InvalidResponse("Chat response is missing 'message'".to_string())
        })?;
        Ok((message.content, parsed.eval_count))
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    /// The model check, generate and chat fallback share one request deadline.
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult {
        let request = CompletionRequest::new(prompt, options)?;
        let started = Instant::now();

        let exchange = async {
            self.ensure_model().await?;
            match self.generate(&request).await? {
                Some(result) => Ok(result),
                None => {
                    warn!(host = %self.host, "/api/generate not found, falling back to /api/chat");
                    self.chat(&request).await
                }
            }
        };
        let (text, tokens) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        Ok(Completion {
            text,
            tokens,
            latency: started.elapsed(),
        })
    }
}

/// Ollama lists models with an explicit tag, so a bare name means `:latest`.
pub fn model_available(available: &[String], wanted: &str) -> bool {
    available
        .iter()
        .any(|name| name == wanted || (!wanted.contains(':') && *name == format!("{}:latest", wanted)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_model_available_matches_implicit_latest() {
        let available = vec!["llama3:latest".to_string(), "mistral:7b".to_string()];
        assert!(model_available(&available, "llama3"));
        assert!(model_available(&available, "llama3:latest"));
        assert!(model_available(&available, "mistral:7b"));
        assert!(!model_available(&available, "mistral"));
        assert!(!model_available(&available, "qwen2"));
    }

    #[test]
    fn test_options_mapping() {
        let options = GenerationOptions::default()
            .with_max_tokens(128)
            .with_temperature(0.3);
        let json = serde_json::to_value(OllamaOptions::from(&options)).unwrap();
        assert_eq!(json["num_predict"], 128);
        assert!((json["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert!(json.get("stop").is_none());
    }
}
