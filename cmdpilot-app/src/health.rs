use crate::config::AppConfig;
use anyhow::Result;
use cmdpilot_providers::{AnyBackend, BackendError};
use std::io::Write;

/// Prints one line per check. Returns whether every check passed.
pub async fn check<W: Write>(backend: &AnyBackend, config: &AppConfig, out: &mut W) -> Result<bool> {
    writeln!(out, "Health Check\n")?;
    let mut healthy = true;

    write!(out, "Workspace {}... ", config.workspace.display())?;
    if config.workspace.is_dir() {
        writeln!(out, "✓")?;
    } else {
        writeln!(out, "✗ (not a directory)")?;
        healthy = false;
    }

    write!(out, "Backend {} ({})... ", config.backend.kind(), config.backend.target())?;
    match check_backend(backend).await {
        Ok(detail) => writeln!(out, "✓ {}", detail)?,
        Err(e) => {
            writeln!(out, "✗ ({})", e)?;
            healthy = false;
        }
    }

    writeln!(out)?;
    if healthy {
        writeln!(out, "All checks passed")?;
    } else {
        writeln!(out, "Health check failed")?;
    }
    Ok(healthy)
}

async fn check_backend(backend: &AnyBackend) -> Result<String, BackendError> {
    match backend {
        // Weights were mapped when the backend was built.
        AnyBackend::Direct(direct) => Ok(format!("weights at {}", direct.model_path().display())),
        AnyBackend::Api(api) => {
            let health = api.health().await?;
            if health.is_ready() {
                Ok(match health.model {
                    Some(model) => format!("serving {}", model),
                    None => "ready".to_string(),
                })
            } else {
                Err(BackendError::InvalidResponse(format!(
                    "server status '{}'{}",
                    health.status,
                    health
                        .message
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                )))
            }
        }
        AnyBackend::Ollama(ollama) => {
            let version = ollama.version().await?;
            ollama.ensure_model().await.map_err(|e| match e {
                BackendError::ModelError {
                    message,
                    available_models,
                } if !available_models.is_empty() => BackendError::ModelError {
                    message: format!("{} (available: {})", message, available_models.join(", ")),
                    available_models,
                },
                other => other,
            })?;
            Ok(format!("ollama {} with {}", version, ollama.model_name()))
        }
    }
}
