use crate::api::ApiBackend;
use crate::config::{BackendConfig, BackendSettings};
use crate::direct::DirectBackend;
use crate::ollama::OllamaBackend;
use crate::traits::*;
use async_trait::async_trait;

/// The closed set of backends an agent can be built with.
pub enum AnyBackend {
    Direct(DirectBackend),
    Api(ApiBackend),
    Ollama(OllamaBackend),
}

impl AnyBackend {
    /// Single construction point. Direct weights are loaded here, so a bad path fails at startup.
    pub fn from_config(
        config: &BackendConfig,
        settings: &BackendSettings,
    ) -> Result<Self, BackendError> {
        let backend = match config {
            BackendConfig::Direct { model_path } => AnyBackend::Direct(DirectBackend::load(model_path)?),
            BackendConfig::Api { base_url } => {
                if base_url.trim().is_empty() {
                    return Err(BackendError::InvalidRequest("API base_url is empty".to_string()));
                }
                AnyBackend::Api(ApiBackend::new(base_url, settings)?)
            }
            BackendConfig::Ollama { model_name, host } => {
                if model_name.trim().is_empty() {
                    return Err(BackendError::InvalidRequest(
                        "Ollama model_name is empty".to_string(),
                    ));
                }
                AnyBackend::Ollama(OllamaBackend::new(host, model_name, settings)?)
            }
        };
        tracing::info!(backend = backend.name(), target = %config.target(), "Backend ready");
        Ok(backend)
    }
}

#[async_trait]
impl Backend for AnyBackend {
    fn name(&self) -> &str {
        match self {
            AnyBackend::Direct(b) => b.name(),
            AnyBackend::Api(b) => b.name(),
            AnyBackend::Ollama(b) => b.name(),
        }
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult {
        match self {
            AnyBackend::Direct(b) => b.complete(prompt, options).await,
            AnyBackend::Api(b) => b.complete(prompt, options).await,
            AnyBackend::Ollama(b) => b.complete(prompt, options).await,
        }
    }
}
