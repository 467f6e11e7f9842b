use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use cmdpilot_core::AgentSettings;
use cmdpilot_executor::{CommandPolicy, ShellConfig};
use cmdpilot_memory::DEFAULT_HISTORY_CAPACITY;
use cmdpilot_providers::config::{DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL};
use cmdpilot_providers::{BackendConfig, BackendSettings, GenerationOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "cmdpilot.yaml";
pub const DEFAULT_MODEL_PATH: &str = "./local_model_weights";

pub const ENV_API_URL: &str = "CMDPILOT_API_URL";
pub const ENV_OLLAMA_URL: &str = "CMDPILOT_OLLAMA_URL";
pub const ENV_MODEL: &str = "CMDPILOT_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub history_capacity: usize,
    pub workspace: PathBuf,
    pub generation: GenerationOptions,
    pub retry_backoff_ms: u64,
    pub command_policy: CommandPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Direct {
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            },
            request_timeout_secs: 60,
            connect_timeout_secs: 5,
            shell_timeout_secs: 30,
            max_output_bytes: 64 * 1024,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            workspace: PathBuf::from("."),
            generation: AgentSettings::default().generation,
            retry_backoff_ms: 500,
            command_policy: CommandPolicy::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// An explicit path must exist. The default path is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// File, then environment, then flags. Validated before returning.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = Self::load_or_default(cli.config.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Ollama settings win over the API URL when both are present.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = lookup(ENV_API_URL) {
            self.backend = BackendConfig::Api { base_url };
        }
        if let Some(url) = lookup(ENV_OLLAMA_URL) {
            match &mut self.backend {
                BackendConfig::Ollama { host, .. } => *host = url,
                _ => {
                    self.backend = BackendConfig::Ollama {
                        model_name: DEFAULT_OLLAMA_MODEL.to_string(),
                        host: url,
                    }
                }
            }
        }
        if let Some(model) = lookup(ENV_MODEL) {
            if let BackendConfig::Ollama { model_name, .. } = &mut self.backend {
                *model_name = model;
            }
        }
    }

    /// `--ollama` beats `--api-url`, which beats an explicit `--model-path`.
    /// Without any of them the configured backend stays.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if cli.ollama {
            let (configured_model, configured_host) = match &self.backend {
                BackendConfig::Ollama { model_name, host } => {
                    (Some(model_name.clone()), Some(host.clone()))
                }
                _ => (None, None),
            };
            self.backend = BackendConfig::Ollama {
                model_name: cli
                    .model_name
                    .clone()
                    .or(configured_model)
                    .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
                host: cli
                    .ollama_url
                    .clone()
                    .or(configured_host)
                    .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            };
        } else if let Some(base_url) = &cli.api_url {
            self.backend = BackendConfig::Api {
                base_url: base_url.clone(),
            };
        } else if let Some(model_path) = &cli.model_path {
            self.backend = BackendConfig::Direct {
                model_path: model_path.clone(),
            };
        } else if let BackendConfig::Ollama { model_name, host } = &mut self.backend {
            if let Some(name) = &cli.model_name {
                *model_name = name.clone();
            }
            if let Some(url) = &cli.ollama_url {
                *host = url.clone();
            }
        }

        if let Some(workspace) = &cli.workspace {
            self.workspace = workspace.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.backend {
            BackendConfig::Direct { model_path } => {
                if model_path.as_os_str().is_empty() {
                    bail!("backend.model_path cannot be empty");
                }
            }
            BackendConfig::Api { base_url } => {
                if base_url.trim().is_empty() {
                    bail!("backend.base_url cannot be empty");
                }
            }
            BackendConfig::Ollama { model_name, host } => {
                if model_name.trim().is_empty() {
                    bail!("backend.model_name cannot be empty");
                }
                if host.trim().is_empty() {
                    bail!("backend.host cannot be empty");
                }
            }
        }

        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("shell_timeout_secs", self.shell_timeout_secs),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.max_output_bytes == 0 {
            bail!("max_output_bytes must be greater than zero");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be greater than zero");
        }

        self.generation
            .validate()
            .map_err(|e| anyhow::anyhow!("generation: {}", e))?;

        Ok(())
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            shell_timeout: Duration::from_secs(self.shell_timeout_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            generation: self.generation.clone(),
        }
    }

    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            max_output_bytes: self.max_output_bytes,
            working_dir: Some(self.workspace.clone()),
            ..ShellConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.backend.kind(), "direct");
        assert_eq!(config.backend.target(), "./local_model_weights");
        assert_eq!(config.history_capacity, 20);
        assert_eq!(config.generation.max_tokens, Some(1024));
        assert_eq!(config.generation.top_p, Some(0.9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_conversion() {
        let config = AppConfig {
            shell_timeout_secs: 7,
            retry_backoff_ms: 20,
            request_timeout_secs: 11,
            workspace: PathBuf::from("/srv/work"),
            ..AppConfig::default()
        };
        assert_eq!(config.agent_settings().shell_timeout, Duration::from_secs(7));
        assert_eq!(config.agent_settings().retry_backoff, Duration::from_millis(20));
        assert_eq!(config.backend_settings().request_timeout, Duration::from_secs(11));
        assert_eq!(
            config.shell_config().working_dir.as_deref(),
            Some(Path::new("/srv/work"))
        );
        assert_eq!(config.shell_config().shell, "sh");
    }
}
