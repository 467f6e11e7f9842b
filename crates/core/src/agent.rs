use crate::classify::{Classified, Classifier, ClassifyError, ClassifyRequest, Completer};
use crate::error::ErrorKind;
use crate::events::{AgentEvent, CallOutcome, CallPurpose, EventSink};
use crate::prompts;
use crate::types::*;
use async_trait::async_trait;
use cmdpilot_executor::{CommandPolicy, ShellError, ShellExecutor, ShellResult};
use cmdpilot_memory::SessionState;
use cmdpilot_providers::{Backend, BackendError, CompletionResult, GenerationOptions};
use cmdpilot_tools::FileManipulator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// First attempt plus one retry.
const MAX_BACKEND_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub shell_timeout: Duration,
    pub retry_backoff: Duration,
    pub generation: GenerationOptions,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            shell_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            generation: GenerationOptions::default()
                .with_max_tokens(1024)
                .with_temperature(0.7)
                .with_top_p(0.9),
        }
    }
}

/// Routes one instruction at a time to the shell, the filesystem or the backend.
pub struct Agent<B: Backend> {
    backend: B,
    shell: ShellExecutor,
    files: FileManipulator,
    policy: CommandPolicy,
    sink: Arc<dyn EventSink>,
    settings: AgentSettings,
    classifier: Classifier,
}

impl<B: Backend> Agent<B> {
    pub fn new(
        backend: B,
        shell: ShellExecutor,
        files: FileManipulator,
        policy: CommandPolicy,
        sink: Arc<dyn EventSink>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            backend,
            shell,
            files,
            policy,
            sink,
            settings,
            classifier: Classifier::standard(),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn files(&self) -> &FileManipulator {
        &self.files
    }

    /// Classification alone, outside a dispatch cycle.
    pub async fn classify(&self, instruction: &str) -> Result<Classified, ClassifyError> {
        let caller = CycleCaller {
            agent: self,
            cycle_id: Uuid::new_v4(),
        };
        let request = ClassifyRequest {
            instruction,
            context: None,
        };
        self.classifier.classify(&request, &caller).await
    }

    /// Runs one full cycle. Never fails: every error ends up in the outcome.
    pub async fn dispatch(
        &self,
        instruction: &str,
        session: Option<&SessionState>,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let mut cycle = Cycle::new();
        self.sink.emit(&AgentEvent::CycleStarted {
            cycle_id: cycle.id,
            instruction: instruction.to_string(),
        });

        let context = session
            .map(SessionState::context_prompt)
            .filter(|c| !c.is_empty());
        let outcome = self
            .run_cycle(&mut cycle, instruction, context.as_deref())
            .await;

        self.sink.emit(&AgentEvent::CycleFinished {
            cycle_id: outcome.cycle_id,
            status: outcome.status.to_string(),
            notices: outcome.notices.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        outcome
    }

    async fn run_cycle(
        &self,
        cycle: &mut Cycle,
        instruction: &str,
        context: Option<&str>,
    ) -> DispatchOutcome {
        if instruction.trim().is_empty() {
            return cycle.fail(ErrorKind::InstructionRejected, "Empty instruction.".to_string());
        }

        let caller = CycleCaller {
            agent: self,
            cycle_id: cycle.id,
        };
        let request = ClassifyRequest {
            instruction,
            context,
        };

        let classified = match self.classifier.classify(&request, &caller).await {
            Ok(classified) => classified,
            Err(ClassifyError::Backend(err)) => {
                return cycle.fail(ErrorKind::from(&err), backend_failure_text(&err))
            }
            Err(ClassifyError::Rejected(reason)) => {
                return cycle.fail(
                    ErrorKind::InstructionRejected,
                    format!("The model could not handle this instruction: {}", reason),
                )
            }
        };

        self.sink.emit(&AgentEvent::Classified {
            cycle_id: cycle.id,
            strategy: classified.strategy,
            classification: classified.classification.label(),
        });
        cycle.classified(classified.classification.clone(), classified.notices);

        match classified.classification {
            Classification::ShellCommand { command } => self.handle_shell(cycle, &command).await,
            Classification::FileOperation(request) => self.handle_file(cycle, &request).await,
            Classification::Question { answer } => {
                self.handle_question(cycle, instruction, context, answer).await
            }
            Classification::Composite { command } => {
                self.handle_composite(cycle, instruction, &command).await
            }
        }
    }

    async fn handle_shell(&self, cycle: &mut Cycle, command: &str) -> DispatchOutcome {
        let result = match self.run_shell(cycle, command).await {
            Ok(result) => result,
            Err(err) => {
                return self
                    .explain_spawn_failure(cycle, instruction, command, &err)
                    .await
            }
        };

        let text = render_shell(&result);
        if result.timed_out {
            let text = format!(
                "Command timed out after {}s. Partial output:\n{}",
                self.settings.shell_timeout.as_secs(),
                text
            );
            cycle.shell = Some(result);
            return cycle.fail(ErrorKind::ShellTimeout, text);
        }
        if result.exit_code != Some(0) {
            cycle.notice(ErrorKind::ShellNonZeroExit);
        }
        cycle.shell = Some(result);
        cycle.complete(text)
    }

    async fn handle_file(&self, cycle: &mut Cycle, request: &FileRequest) -> DispatchOutcome {
        cycle.enter(CycleState::Executing(Handler::File));

        let result = match request {
            FileRequest::Read { path } => self
                .files
                .read(path)
                .await
                .map(|content| non_empty(content, "(empty file)")),
            FileRequest::Write { path, content } => {
                self.files.write(path, content).await.map(|receipt| {
                    format!("Wrote {} bytes to {}", receipt.bytes_written, path)
                })
            }
            FileRequest::List { path } => self
                .files
                .list(path)
                .await
                .map(|entries| non_empty(entries.join("\n"), "(empty directory)")),
        };

        self.sink.emit(&AgentEvent::FileOperation {
            cycle_id: cycle.id,
            op: request.op(),
            path: request.path().to_string(),
            error: result.as_ref().err().map(ErrorKind::from),
        });

        match result {
            Ok(text) => cycle.complete(text),
            Err(err) => cycle.fail(ErrorKind::from(&err), err.to_string()),
        }
    }

    async fn handle_question(
        &self,
        cycle: &mut Cycle,
        instruction: &str,
        context: Option<&str>,
        answer: Option<String>,
    ) -> DispatchOutcome {
        if let Some(answer) = answer.filter(|a| !a.trim().is_empty()) {
            return cycle.complete(answer);
        }

        cycle.enter(CycleState::Querying);
        let prompt = prompts::question(instruction, context);
        match self.call_backend(cycle.id, CallPurpose::Question, &prompt).await {
            Ok(completion) => cycle.complete(non_empty(
                completion.text,
                "(the model returned an empty response)",
            )),
            Err(err) => cycle.fail(ErrorKind::from(&err), backend_failure_text(&err)),
        }
    }

    async fn handle_composite(
        &self,
        cycle: &mut Cycle,
        instruction: &str,
        command: &str,
    ) -> DispatchOutcome {
        if let Err(err) = self.policy.check(command) {
            warn!(command = %command, error = %err, "Model-proposed command denied");
            return cycle.fail(
                ErrorKind::from(&err),
                format!("Refusing to run the proposed command `{}`: {}", command, err),
            );
        }

        // The command runs exactly once; only the backend call below is retried.
        let result = match self.run_shell(cycle, command).await {
            Ok(result) => result,
            Err(err) => {
                return cycle.fail(
                    ErrorKind::from(&err),
                    format!("Could not run `{}`: {}", command, err),
                )
            }
        };

        let timed_out = result.timed_out;
        if !timed_out && result.exit_code != Some(0) {
            cycle.notice(ErrorKind::ShellNonZeroExit);
        }
        let raw = render_shell(&result);
        let prompt = prompts::summary(instruction, &result);
        cycle.shell = Some(result);

        cycle.enter(CycleState::Querying);
        match self.call_backend(cycle.id, CallPurpose::Summary, &prompt).await {
            Ok(completion) => {
                let text = non_empty(completion.text, &raw);
                if timed_out {
                    cycle.fail(ErrorKind::ShellTimeout, text)
                } else {
                    cycle.complete(text)
                }
            }
            Err(err) => cycle.fail(
                ErrorKind::from(&err),
                format!(
                    "{}\n\nOutput of `{}`:\n{}",
                    backend_failure_text(&err),
                    command,
                    raw
                ),
            ),
        }
    }

    /// The cycle fails either way; the model's explanation replaces the raw error when it answers.
    async fn explain_spawn_failure(
        &self,
        cycle: &mut Cycle,
        instruction: &str,
        command: &str,
        err: &ShellError,
    ) -> DispatchOutcome {
        let kind = ErrorKind::from(err);
        let raw = format!("Could not run `{}`: {}", command, err);
        let prompt = prompts::spawn_failure(instruction, command, &err.to_string());

        cycle.enter(CycleState::Querying);
        match self.call_backend(cycle.id, CallPurpose::Summary, &prompt).await {
            Ok(completion) => cycle.fail(kind, non_empty(completion.text, &raw)),
            Err(summary_err) => {
                warn!(cycle_id = %cycle.id, error = %summary_err, "Summary of failed command unavailable");
                cycle.fail(kind, raw)
            }
        }
    }

    async fn run_shell(&self, cycle: &mut Cycle, command: &str) -> Result<ShellResult, ShellError> {
        cycle.enter(CycleState::Executing(Handler::Shell));
        let result = self.shell.run(command, self.settings.shell_timeout).await;
        match &result {
            Ok(r) => self.sink.emit(&AgentEvent::ShellExecuted {
                cycle_id: cycle.id,
                command: r.command.clone(),
                exit_code: r.exit_code,
                timed_out: r.timed_out,
                duration_ms: r.duration.as_millis() as u64,
            }),
            Err(err) => warn!(cycle_id = %cycle.id, command = %command, error = %err, "Shell command failed to start"),
        }
        result
    }

    /// One backend call, retried once after a backoff when the failure is transient.
    async fn call_backend(
        &self,
        cycle_id: Uuid,
        purpose: CallPurpose,
        prompt: &str,
    ) -> CompletionResult {
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = self.backend.complete(prompt, &self.settings.generation).await;

            self.sink.emit(&AgentEvent::BackendCall {
                cycle_id,
                purpose,
                attempt,
                outcome: match &result {
                    Ok(_) => CallOutcome::Success,
                    Err(err) => CallOutcome::Error(ErrorKind::from(err)),
                },
                latency_ms: started.elapsed().as_millis() as u64,
            });

            match result {
                Err(err) if err.is_transient() && attempt < MAX_BACKEND_ATTEMPTS => {
                    warn!(
                        %cycle_id,
                        ?purpose,
                        backoff_ms = self.settings.retry_backoff.as_millis() as u64,
                        error = %err,
                        "Transient backend failure, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

struct CycleCaller<'a, B: Backend> {
    agent: &'a Agent<B>,
    cycle_id: Uuid,
}

#[async_trait]
impl<'a, B: Backend> Completer for CycleCaller<'a, B> {
    async fn complete(&self, purpose: CallPurpose, prompt: &str) -> Result<String, BackendError> {
        self.agent
            .call_backend(self.cycle_id, purpose, prompt)
            .await
            .map(|completion| completion.text)
    }
}

/// Mutable bookkeeping for one cycle, frozen into a [`DispatchOutcome`] at the end.
struct Cycle {
    id: Uuid,
    states: Vec<CycleState>,
    notices: Vec<ErrorKind>,
    classification: Option<Classification>,
    shell: Option<ShellResult>,
}

impl Cycle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            states: vec![CycleState::Received],
            notices: Vec::new(),
            classification: None,
            shell: None,
        }
    }

    fn enter(&mut self, state: CycleState) {
        self.states.push(state);
    }

    fn notice(&mut self, kind: ErrorKind) {
        if !self.notices.contains(&kind) {
            self.notices.push(kind);
        }
    }

    fn classified(&mut self, classification: Classification, notices: Vec<ErrorKind>) {
        self.classification = Some(classification);
        for kind in notices {
            self.notice(kind);
        }
        self.enter(CycleState::Classified);
    }

    fn complete(&mut self, text: String) -> DispatchOutcome {
        self.finish(DispatchStatus::Completed, text)
    }

    fn fail(&mut self, kind: ErrorKind, text: String) -> DispatchOutcome {
        self.finish(DispatchStatus::Failed(kind), text)
    }

    fn finish(&mut self, status: DispatchStatus, text: String) -> DispatchOutcome {
        self.enter(match status {
            DispatchStatus::Completed => CycleState::Completed,
            DispatchStatus::Failed(_) => CycleState::Failed,
        });
        DispatchOutcome {
            cycle_id: self.id,
            classification: self.classification.take(),
            status,
            notices: std::mem::take(&mut self.notices),
            text: non_empty(text, "(no output)"),
            shell: self.shell.take(),
            states: std::mem::take(&mut self.states),
        }
    }
}

fn non_empty(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

fn render_shell(result: &ShellResult) -> String {
    let mut parts = Vec::new();
    if !result.stdout.trim().is_empty() {
        parts.push(result.stdout.trim_end().to_string());
    }
    if !result.stderr.trim().is_empty() {
        parts.push(format!("stderr:\n{}", result.stderr.trim_end()));
    }
    match result.exit_code {
        Some(0) => {}
        Some(code) => parts.push(format!("[exit code {}]", code)),
        None if !result.timed_out => parts.push("[terminated by signal]".to_string()),
        None => {}
    }

    if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    }
}

fn backend_failure_text(err: &BackendError) -> String {
    match err {
        BackendError::ModelError {
            message,
            available_models,
        } if !available_models.is_empty() => format!(
            "The model backend reported an error: {}. Available models: {}",
            message,
            available_models.join(", ")
        ),
        other => format!(
            "The model backend failed ({}): {}",
            ErrorKind::from(other),
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_result(exit_code: Option<i32>, stdout: &str, stderr: &str, timed_out: bool) -> ShellResult {
        ShellResult {
            command: "cmd".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(5),
            timed_out,
        }
    }

    #[test]
    fn test_render_shell() {
        assert_eq!(render_shell(&shell_result(Some(0), "a\nb\n", "", false)), "a\nb");
        assert_eq!(render_shell(&shell_result(Some(0), "", "", false)), "(no output)");
        assert_eq!(
            render_shell(&shell_result(Some(2), "", "ls: nope\n", false)),
            "stderr:\nls: nope\n[exit code 2]"
        );
        assert_eq!(
            render_shell(&shell_result(None, "", "", false)),
            "[terminated by signal]"
        );
        assert_eq!(render_shell(&shell_result(None, "part", "", true)), "part");
    }

    #[test]
    fn test_cycle_records_path_and_dedups_notices() {
        let mut cycle = Cycle::new();
        cycle.classified(
            Classification::Question { answer: None },
            vec![ErrorKind::ClassificationAmbiguous],
        );
        cycle.notice(ErrorKind::ClassificationAmbiguous);
        cycle.enter(CycleState::Querying);
        let outcome = cycle.complete(String::new());

        assert_eq!(
            outcome.states,
            vec![
                CycleState::Received,
                CycleState::Classified,
                CycleState::Querying,
                CycleState::Completed
            ]
        );
        assert_eq!(outcome.notices, vec![ErrorKind::ClassificationAmbiguous]);
        assert_eq!(outcome.text, "(no output)");
    }

    #[test]
    fn test_missing_model_text_lists_alternatives() {
        let err = BackendError::ModelError {
            message: "Model 'qwen' is not available".to_string(),
            available_models: vec!["llama3:latest".to_string()],
        };
        assert!(backend_failure_text(&err).ends_with("Available models: llama3:latest"));
    }

    #[test]
    fn test_default_settings() {
        let settings = AgentSettings::default();
        assert_eq!(settings.shell_timeout, Duration::from_secs(30));
        assert_eq!(settings.retry_backoff, Duration::from_millis(500));
        assert_eq!(settings.generation.max_tokens, Some(1024));
    }
}
