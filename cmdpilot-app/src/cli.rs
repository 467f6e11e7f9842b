use clap::Parser;
use std::path::PathBuf;

/// Natural-language task dispatcher backed by a local or remote language model.
#[derive(Debug, Default, Clone, Parser)]
#[command(name = "cmdpilot", version, about)]
pub struct Cli {
    /// URL of the completion API server
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Path to local model weights [default: ./local_model_weights]
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Use an Ollama server for inference
    #[arg(long)]
    pub ollama: bool,

    /// Ollama server URL [default: http://localhost:11434]
    #[arg(long, value_name = "URL")]
    pub ollama_url: Option<String>,

    /// Ollama model name [default: llama3]
    #[arg(long, value_name = "NAME")]
    pub model_name: Option<String>,

    /// Read instructions from the console until `exit`
    #[arg(long, short)]
    pub interactive: bool,

    /// Run a single instruction and exit
    #[arg(long, short, value_name = "TEXT")]
    pub command: Option<String>,

    /// YAML configuration file [default: ./cmdpilot.yaml when present]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory that shell commands and file operations run in
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Check that the backend is reachable, then exit
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Check,
    Single(String),
    Interactive,
}

impl Cli {
    /// `--check` wins, then `--command`; anything else is interactive.
    pub fn mode(&self) -> Mode {
        if self.check {
            Mode::Check
        } else if let Some(command) = &self.command {
            Mode::Single(command.clone())
        } else {
            Mode::Interactive
        }
    }
}
