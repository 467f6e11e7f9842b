//! In-process backend serving completions from locally loaded weights.

use crate::traits::*;
use async_trait::async_trait;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin", "gguf", "pt"];

/// Weights mapped into process memory. Held for the backend's lifetime.
pub struct LoadedWeights {
    path: PathBuf,
    files: Vec<(PathBuf, Mmap)>,
}

impl LoadedWeights {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let fail = |reason: String| BackendError::WeightsLoad {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = std::fs::metadata(path).map_err(|e| fail(e.to_string()))?;
        let candidates = if metadata.is_dir() {
            validate_model_config(path).map_err(fail)?;
            weight_files(path).map_err(|e| fail(e.to_string()))?
        } else {
            vec![path.to_path_buf()]
        };

        if candidates.is_empty() {
            return Err(fail("No weight files found".to_string()));
        }

        let mut files = Vec::with_capacity(candidates.len());
        for file_path in candidates {
            let file = File::open(&file_path).map_err(|e| fail(e.to_string()))?;
            let len = file.metadata().map_err(|e| fail(e.to_string()))?.len();
            if len == 0 {
                return Err(fail(format!("{} is empty", file_path.display())));
            }
            // SAFETY: the mapping is read-only and the file is not modified while loaded.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| fail(e.to_string()))?;
            files.push((file_path, map));
        }

        Ok(Self {
            path: path.to_path_buf(),
            files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|(_, map)| map.len()).sum()
    }
}

fn validate_model_config(dir: &Path) -> Result<(), String> {
    let config_path = dir.join("config.json");
    if !config_path.exists() {
        return Ok(());
    }
    let content = std::fs::read_to_string(&config_path).map_err(|e| e.to_string())?;
    serde_json::from_str::<serde_json::Value>(&content)
        .map(|_| ())
        .map_err(|e| format!("config.json is corrupt: {}", e))
}

fn weight_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut regular = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            regular.push(entry.path());
        }
    }
    regular.sort();

    let weights: Vec<PathBuf> = regular
        .iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| WEIGHT_EXTENSIONS.contains(&e))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if weights.is_empty() {
        Ok(regular
            .into_iter()
            .filter(|p| p.file_name().map(|n| n != "config.json").unwrap_or(true))
            .take(1)
            .collect())
    } else {
        Ok(weights)
    }
}

/// Inference runtime running inside the process.
pub trait LocalModel: Send + Sync {
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, String>;
}

/// Deterministic stand-in runtime. Echoes the prompt in a fixed template,
/// bounded by `max_tokens` whitespace tokens and cut at the first stop sequence.
pub struct SimulatedModel {
    weights: LoadedWeights,
}

impl SimulatedModel {
    pub fn new(weights: LoadedWeights) -> Self {
        Self { weights }
    }
}

impl LocalModel for SimulatedModel {
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, String> {
        if self.weights.total_bytes() == 0 {
            return Err("No weights resident".to_string());
        }

        let mut text = format!("This is a simulated response to: {}", prompt.trim());

        if let Some(cut) = options
            .stop_sequences
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| text.find(s.as_str()))
            .min()
        {
            text.truncate(cut);
        }

        if let Some(max) = options.max_tokens {
            let words: Vec<&str> = text.split_whitespace().collect();
            if words.len() > max as usize {
                text = words[..max as usize].join(" ");
            }
        }

        Ok(text)
    }
}

pub struct DirectBackend {
    model: Arc<dyn LocalModel>,
    model_path: PathBuf,
}

impl DirectBackend {
    /// Maps the weights at `model_path` and serves them with [`SimulatedModel`].
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let model_path = model_path.as_ref().to_path_buf();
        let weights = LoadedWeights::load(&model_path)?;
        info!(
            path = %model_path.display(),
            files = weights.file_count(),
            bytes = weights.total_bytes(),
            "Model weights loaded"
        );
        Ok(Self::with_model(model_path, Arc::new(SimulatedModel::new(weights))))
    }

    pub fn with_model(model_path: PathBuf, model: Arc<dyn LocalModel>) -> Self {
        Self { model, model_path }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[async_trait]
impl Backend for DirectBackend {
    fn name(&self) -> &str {
        "direct"
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> CompletionResult {
        let request = CompletionRequest::new(prompt, options)?;
        let model = Arc::clone(&self.model);
        let prompt = request.prompt.to_string();
        let options = request.options.clone();

        let started = Instant::now();
        let text = tokio::task::spawn_blocking(move || model.generate(&prompt, &options))
            .await
            .map_err(|e| BackendError::model(format!("Inference task failed: {}", e)))?
            .map_err(BackendError::model)?;

        let latency = started.elapsed();
        debug!(latency_ms = latency.as_millis() as u64, "Local inference finished");

        Ok(Completion {
            tokens: Some(text.split_whitespace().count() as u32),
            text,
            latency,
        })
    }
}
