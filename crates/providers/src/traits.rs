use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Model error: {message}")]
    ModelError {
        message: String,
        available_models: Vec<String>,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to load weights from {path}: {reason}")]
    WeightsLoad { path: PathBuf, reason: String },
}

impl BackendError {
    pub fn model(message: impl Into<String>) -> Self {
        BackendError::ModelError {
            message: message.into(),
            available_models: Vec::new(),
        }
    }

    /// Only connection failures and deadline expiry are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unreachable(_) | BackendError::Timeout(_))
    }
}

/// Generation parameters. Unknown keys in serialized form are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub stop_sequences: BTreeSet<String>,
}

impl GenerationOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.insert(stop.into());
        self
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.max_tokens == Some(0) {
            return Err(BackendError::InvalidRequest(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(BackendError::InvalidRequest(format!(
                    "temperature {} outside [0, 2]",
                    t
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(BackendError::InvalidRequest(format!(
                    "top_p {} outside (0, 1]",
                    p
                )));
            }
        }
        Ok(())
    }
}

/// A single, never-reused request built for one `complete` call.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub options: &'a GenerationOptions,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str, options: &'a GenerationOptions) -> Result<Self, BackendError> {
        if prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Prompt is empty".to_string()));
        }
        options.validate()?;
        Ok(Self { prompt, options })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens: Option<u32>,
    pub latency: Duration,
}

pub type CompletionResult = Result<Completion, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult {
        (**self).complete(prompt, options).await
    }
}
