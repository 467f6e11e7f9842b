pub mod agent;
pub mod classify;
pub mod error;
pub mod events;
pub mod prompts;
pub mod types;

pub use agent::{Agent, AgentSettings};
pub use classify::{
    ClassificationStrategy, Classified, Classifier, ClassifyError, ClassifyRequest, Completer,
    Decision, ModelClassifier, PatternRules,
};
pub use error::ErrorKind;
pub use events::{AgentEvent, CallOutcome, CallPurpose, EventSink, TracingEventSink};
pub use types::*;
