pub mod api;
pub mod backend;
pub mod config;
pub mod direct;
mod http;
pub mod ollama;
pub mod traits;

pub use api::{ApiBackend, ServerHealth};
pub use backend::AnyBackend;
pub use config::{BackendConfig, BackendSettings};
pub use direct::{DirectBackend, LocalModel, SimulatedModel};
pub use ollama::OllamaBackend;
pub use traits::{
    Backend, BackendError, Completion, CompletionRequest, CompletionResult, GenerationOptions,
};
