//! Structured record of what a dispatch cycle did.
//!
//! The agent reports through an injected [`EventSink`]. The default sink turns
//! events into `tracing` records; tests substitute one that keeps them.

use crate::error::ErrorKind;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Classification,
    Question,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Error(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    CycleStarted {
        cycle_id: Uuid,
        instruction: String,
    },
    Classified {
        cycle_id: Uuid,
        strategy: &'static str,
        classification: &'static str,
    },
    BackendCall {
        cycle_id: Uuid,
        purpose: CallPurpose,
        attempt: u32,
        outcome: CallOutcome,
        latency_ms: u64,
    },
    ShellExecuted {
        cycle_id: Uuid,
        command: String,
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: u64,
    },
    FileOperation {
        cycle_id: Uuid,
        op: &'static str,
        path: String,
        error: Option<ErrorKind>,
    },
    CycleFinished {
        cycle_id: Uuid,
        status: String,
        notices: Vec<ErrorKind>,
        duration_ms: u64,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AgentEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &AgentEvent) {
        match event {
            AgentEvent::CycleStarted {
                cycle_id,
                instruction,
            } => info!(%cycle_id, instruction = %instruction, "Dispatch cycle started"),
            AgentEvent::Classified {
                cycle_id,
                strategy,
                classification,
            } => info!(%cycle_id, strategy, classification, "Instruction classified"),
            AgentEvent::BackendCall {
                cycle_id,
                purpose,
                attempt,
                outcome,
                latency_ms,
            } => match outcome {
                CallOutcome::Success => {
                    debug!(%cycle_id, ?purpose, attempt, latency_ms, "Backend call succeeded")
                }
                CallOutcome::Error(kind) => {
                    warn!(%cycle_id, ?purpose, attempt, latency_ms, error = %kind, "Backend call failed")
                }
            },
            AgentEvent::ShellExecuted {
                cycle_id,
                command,
                exit_code,
                timed_out,
                duration_ms,
            } => info!(
                %cycle_id,
                command = %command,
                exit_code = ?exit_code,
                timed_out,
                duration_ms,
                "Shell command executed"
            ),
            AgentEvent::FileOperation {
                cycle_id,
                op,
                path,
                error,
            } => match error {
                None => info!(%cycle_id, op, path = %path, "File operation succeeded"),
                Some(kind) => warn!(%cycle_id, op, path = %path, error = %kind, "File operation failed"),
            },
            AgentEvent::CycleFinished {
                cycle_id,
                status,
                notices,
                duration_ms,
            } => info!(%cycle_id, status = %status, notices = ?notices, duration_ms, "Dispatch cycle finished"),
        }
    }
}
