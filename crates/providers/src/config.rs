use crate::traits::BackendError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// Which backend serves completions. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    #[serde(rename = "direct")]
    Direct { model_path: PathBuf },
    #[serde(rename = "api")]
    Api { base_url: String },
    #[serde(rename = "ollama")]
    Ollama {
        model_name: String,
        #[serde(default = "default_ollama_host")]
        host: String,
    },
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Direct { .. } => "direct",
            BackendConfig::Api { .. } => "api",
            BackendConfig::Ollama { .. } => "ollama",
        }
    }

    /// Human-readable target: a path, a URL, or `model@host`.
    pub fn target(&self) -> String {
        match self {
            BackendConfig::Direct { model_path } => model_path.display().to_string(),
            BackendConfig::Api { base_url } => base_url.clone(),
            BackendConfig::Ollama { model_name, host } => format!("{}@{}", model_name, host),
        }
    }
}

/// Transport deadlines shared by the HTTP backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendSettings {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub(crate) fn build_http_client(
    settings: &BackendSettings,
) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout.min(settings.request_timeout))
        .build()
        .map_err(|e| BackendError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))
}
