use cmdpilot_executor::{PolicyError, ShellError};
use cmdpilot_providers::BackendError;
use cmdpilot_tools::FileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every condition a dispatch cycle can fail with or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnreachable,
    BackendTimeout,
    BackendInvalidResponse,
    BackendModelError,
    BackendInvalidRequest,
    ShellTimeout,
    ShellNonZeroExit,
    ShellSpawnFailed,
    CommandDenied,
    FileNotFound,
    FilePermissionDenied,
    FileDiskFull,
    FileOutsideBase,
    FileIo,
    ClassificationAmbiguous,
    InstructionRejected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BackendUnreachable => "backend_unreachable",
            ErrorKind::BackendTimeout => "backend_timeout",
            ErrorKind::BackendInvalidResponse => "backend_invalid_response",
            ErrorKind::BackendModelError => "backend_model_error",
            ErrorKind::BackendInvalidRequest => "backend_invalid_request",
            ErrorKind::ShellTimeout => "shell_timeout",
            ErrorKind::ShellNonZeroExit => "shell_non_zero_exit",
            ErrorKind::ShellSpawnFailed => "shell_spawn_failed",
            ErrorKind::CommandDenied => "command_denied",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::FilePermissionDenied => "file_permission_denied",
            ErrorKind::FileDiskFull => "file_disk_full",
            ErrorKind::FileOutsideBase => "file_outside_base",
            ErrorKind::FileIo => "file_io",
            ErrorKind::ClassificationAmbiguous => "classification_ambiguous",
            ErrorKind::InstructionRejected => "instruction_rejected",
        }
    }

    /// Worth one more attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::BackendUnreachable | ErrorKind::BackendTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BackendError> for ErrorKind {
    fn from(err: &BackendError) -> Self {
        match err {
            BackendError::Unreachable(_) => ErrorKind::BackendUnreachable,
            BackendError::Timeout(_) => ErrorKind::BackendTimeout,
            BackendError::InvalidResponse(_) => ErrorKind::BackendInvalidResponse,
            BackendError::ModelError { .. } | BackendError::WeightsLoad { .. } => {
                ErrorKind::BackendModelError
            }
            BackendError::InvalidRequest(_) => ErrorKind::BackendInvalidRequest,
        }
    }
}

impl From<&FileError> for ErrorKind {
    fn from(err: &FileError) -> Self {
        match err {
            FileError::NotFound(_) => ErrorKind::FileNotFound,
            FileError::PermissionDenied(_) => ErrorKind::FilePermissionDenied,
            FileError::DiskFull(_) => ErrorKind::FileDiskFull,
            FileError::OutsideBase(_) => ErrorKind::FileOutsideBase,
            FileError::Io { .. } => ErrorKind::FileIo,
        }
    }
}

impl From<&ShellError> for ErrorKind {
    fn from(err: &ShellError) -> Self {
        match err {
            ShellError::EmptyCommand => ErrorKind::InstructionRejected,
            ShellError::Spawn(_) => ErrorKind::ShellSpawnFailed,
        }
    }
}

impl From<&PolicyError> for ErrorKind {
    fn from(_: &PolicyError) -> Self {
        ErrorKind::CommandDenied
    }
}
