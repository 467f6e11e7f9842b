use crate::error::ErrorKind;
use cmdpilot_executor::ShellResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileRequest {
    Read { path: String },
    Write { path: String, content: String },
    List { path: String },
}

impl FileRequest {
    pub fn op(&self) -> &'static str {
        match self {
            FileRequest::Read { .. } => "read",
            FileRequest::Write { .. } => "write",
            FileRequest::List { .. } => "list",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileRequest::Read { path }
            | FileRequest::Write { path, .. }
            | FileRequest::List { path } => path,
        }
    }
}

/// What an instruction turned out to need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    /// A command the user typed; run as-is.
    ShellCommand { command: String },
    FileOperation(FileRequest),
    /// Answered by the model. `answer` is set when classification already produced it.
    Question { answer: Option<String> },
    /// A command proposed by the model; run, then summarized by the model.
    Composite { command: String },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::ShellCommand { .. } => "shell_command",
            Classification::FileOperation(_) => "file_operation",
            Classification::Question { .. } => "question",
            Classification::Composite { .. } => "composite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    Shell,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Received,
    Classified,
    Executing(Handler),
    Querying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Failed(ErrorKind),
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStatus::Completed => f.write_str("completed"),
            DispatchStatus::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub cycle_id: Uuid,
    /// `None` only when the cycle failed before classification finished.
    pub classification: Option<Classification>,
    pub status: DispatchStatus,
    pub notices: Vec<ErrorKind>,
    pub text: String,
    pub shell: Option<ShellResult>,
    pub states: Vec<CycleState>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == DispatchStatus::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            DispatchStatus::Completed => None,
            DispatchStatus::Failed(kind) => Some(kind),
        }
    }
}
