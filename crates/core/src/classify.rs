//! Instruction classification as an ordered chain of strategies.
//!
//! Deterministic pattern rules run first and never touch the backend. When
//! every rule defers, the model is asked to answer in a small line-oriented
//! protocol:
//!
//! ```text
//! ACTION: shell | file | respond | error
//! COMMAND: <shell command>          (shell)
//! OP: read|write|list               (file)
//! PATH: <path>                      (file)
//! CONTENT: <text, may span lines>   (respond, file write)
//! REASON: <why it cannot be done>   (error)
//! ```

use crate::error::ErrorKind;
use crate::events::CallPurpose;
use crate::prompts;
use crate::types::{Classification, FileRequest};
use async_trait::async_trait;
use cmdpilot_providers::BackendError;
use thiserror::Error;
use tracing::{debug, warn};

const COMMAND_PREFIXES: &[&str] = &[
    "ls", "cd ", "pwd", "cat ", "date", "echo ", "whoami", "uname", "df", "du ", "ps", "git ",
];

#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub instruction: &'a str,
    /// Rendered session history, when running interactively.
    pub context: Option<&'a str>,
}

/// Backend access handed to strategies. Retries and event reporting happen behind it.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, purpose: CallPurpose, prompt: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Decided(Classification),
    /// A fallback reading, reported as a notice on the outcome.
    Degraded(Classification, ErrorKind),
    Defer,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Backend failed during classification: {0}")]
    Backend(#[from] BackendError),
    #[error("The model declined the instruction: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub classification: Classification,
    pub strategy: &'static str,
    pub notices: Vec<ErrorKind>,
}

#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(
        &self,
        request: &ClassifyRequest<'_>,
        model: &dyn Completer,
    ) -> Result<Decision, ClassifyError>;
}

pub struct Classifier {
    strategies: Vec<Box<dyn ClassificationStrategy>>,
}

impl Classifier {
    pub fn new(strategies: Vec<Box<dyn ClassificationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Pattern rules, then the model.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(PatternRules::default()),
            Box::new(ModelClassifier),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn classify(
        &self,
        request: &ClassifyRequest<'_>,
        model: &dyn Completer,
    ) -> Result<Classified, ClassifyError> {
        for strategy in &self.strategies {
            let (classification, notices) = match strategy.classify(request, model).await? {
                Decision::Decided(c) => (c, Vec::new()),
                Decision::Degraded(c, kind) => (c, vec![kind]),
                Decision::Defer => continue,
            };
            debug!(strategy = strategy.name(), classification = classification.label(), "Strategy decided");
            return Ok(Classified {
                classification,
                strategy: strategy.name(),
                notices,
            });
        }

        Ok(Classified {
            classification: Classification::Question { answer: None },
            strategy: "fallback",
            notices: Vec::new(),
        })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}

/// Deterministic rules: explicit shell markers, common command prefixes and file phrases.
#[derive(Debug, Clone)]
pub struct PatternRules {
    prefixes: Vec<String>,
}

impl Default for PatternRules {
    fn default() -> Self {
        Self::with_prefixes(COMMAND_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl PatternRules {
    /// A prefix ending in a space requires arguments; otherwise it matches at a word boundary.
    pub fn with_prefixes(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn match_instruction(&self, instruction: &str) -> Option<Classification> {
        let text = instruction.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(command) = explicit_shell(text) {
            return Some(Classification::ShellCommand { command });
        }
        if let Some(request) = file_phrase(text) {
            return Some(Classification::FileOperation(request));
        }
        if self.has_command_prefix(text) {
            return Some(Classification::ShellCommand {
                command: text.to_string(),
            });
        }
        None
    }

    fn has_command_prefix(&self, text: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            if prefix.ends_with(' ') {
                text.starts_with(prefix.as_str()) && !text[prefix.len()..].trim().is_empty()
            } else {
                text == prefix
                    || text
                        .strip_prefix(prefix.as_str())
                        .map(|rest| rest.starts_with(char::is_whitespace))
                        .unwrap_or(false)
            }
        })
    }
}

#[async_trait]
impl ClassificationStrategy for PatternRules {
    fn name(&self) -> &'static str {
        "pattern_rules"
    }

    async fn classify(
        &self,
        request: &ClassifyRequest<'_>,
        _model: &dyn Completer,
    ) -> Result<Decision, ClassifyError> {
        Ok(self
            .match_instruction(request.instruction)
            .map(Decision::Decided)
            .unwrap_or(Decision::Defer))
    }
}

/// Asks the backend which action the instruction needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelClassifier;

#[async_trait]
impl ClassificationStrategy for ModelClassifier {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn classify(
        &self,
        request: &ClassifyRequest<'_>,
        model: &dyn Completer,
    ) -> Result<Decision, ClassifyError> {
        let prompt = prompts::classification(request.instruction, request.context);
        let reply = model.complete(CallPurpose::Classification, &prompt).await?;

        match parse_action(&reply) {
            ParsedAction::Classified(classification) => Ok(Decision::Decided(classification)),
            ParsedAction::Rejected(reason) => Err(ClassifyError::Rejected(reason)),
            ParsedAction::Unparsed => {
                warn!("Model reply is not an ACTION block, treating it as a direct answer");
                let raw = reply.trim();
                let answer = (!raw.is_empty()).then(|| raw.to_string());
                Ok(Decision::Degraded(
                    Classification::Question { answer },
                    ErrorKind::ClassificationAmbiguous,
                ))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAction {
    Classified(Classification),
    Rejected(String),
    Unparsed,
}

pub fn parse_action(reply: &str) -> ParsedAction {
    let lines: Vec<&str> = reply.lines().collect();
    let Some((start, action)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, line)| field_value(line, "ACTION").map(|a| (i, a.to_ascii_lowercase())))
    else {
        return ParsedAction::Unparsed;
    };
    let body = &lines[start + 1..];

    let classified = match action.as_str() {
        "shell" => single_field(body, "COMMAND")
            .map(strip_code)
            .filter(|c| !c.is_empty())
            .map(|command| Classification::Composite { command }),
        "respond" => trailing_field(body, "CONTENT")
            .filter(|c| !c.is_empty())
            .map(|answer| Classification::Question {
                answer: Some(answer),
            }),
        "file" => file_action(body).map(Classification::FileOperation),
        "error" => {
            let reason = single_field(body, "REASON")
                .filter(|r| !r.is_empty())
                .unwrap_or("no reason given");
            return ParsedAction::Rejected(reason.to_string());
        }
        _ => None,
    };

    classified
        .map(ParsedAction::Classified)
        .unwrap_or(ParsedAction::Unparsed)
}

fn file_action(body: &[&str]) -> Option<FileRequest> {
    let op = single_field(body, "OP")?.to_ascii_lowercase();
    let path = single_field(body, "PATH").map(clean_path).unwrap_or_default();

    match op.as_str() {
        "read" if !path.is_empty() => Some(FileRequest::Read { path }),
        "list" => Some(FileRequest::List {
            path: if path.is_empty() { ".".to_string() } else { path },
        }),
        "write" if !path.is_empty() => Some(FileRequest::Write {
            path,
            content: trailing_field(body, "CONTENT").unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Value of a `KEY: value` line, key matched case-insensitively.
fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let line = line.trim_start();
    let head = line.get(..key.len())?;
    if !head.eq_ignore_ascii_case(key) {
        return None;
    }
    line[key.len()..].trim_start().strip_prefix(':').map(str::trim)
}

fn single_field<'a>(body: &[&'a str], key: &str) -> Option<&'a str> {
    body.iter().find_map(|line| field_value(line, key))
}

/// The value of `key` plus every line after it.
fn trailing_field(body: &[&str], key: &str) -> Option<String> {
    let idx = body.iter().position(|line| field_value(line, key).is_some())?;
    let first = field_value(body[idx], key)?;
    let mut parts = vec![first];
    parts.extend(body[idx + 1..].iter().copied());
    let joined = parts.join("\n");
    Some(joined.trim().trim_end_matches("```").trim_end().to_string())
}

fn strip_code(text: &str) -> String {
    text.trim().trim_matches('`').trim().to_string()
}

fn clean_path(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn explicit_shell(text: &str) -> Option<String> {
    let command = ["run ", "exec ", "$ "]
        .iter()
        .find_map(|marker| strip_prefix_ci(text, marker))
        .or_else(|| text.strip_prefix('!'))
        .map(strip_code)
        .or_else(|| {
            let inner = text.strip_prefix('`')?.strip_suffix('`')?;
            (!inner.contains('`')).then(|| inner.trim().to_string())
        })?;

    (!command.is_empty()).then_some(command)
}

fn file_phrase(text: &str) -> Option<FileRequest> {
    for verb in ["read file ", "show file ", "open file "] {
        if let Some(rest) = strip_prefix_ci(text, verb) {
            let path = clean_path(rest);
            if !path.is_empty() {
                return Some(FileRequest::Read { path });
            }
        }
    }

    for verb in ["list files in ", "list directory ", "ls-dir "] {
        if let Some(rest) = strip_prefix_ci(text, verb) {
            let path = clean_path(rest);
            if !path.is_empty() {
                return Some(FileRequest::List { path });
            }
        }
    }
    if ["list files", "list directory", "ls-dir"]
        .iter()
        .any(|phrase| text.eq_ignore_ascii_case(phrase))
    {
        return Some(FileRequest::List {
            path: ".".to_string(),
        });
    }

    strip_prefix_ci(text, "write ").and_then(write_phrase)
}

fn write_phrase(rest: &str) -> Option<FileRequest> {
    let rest = rest.trim_start();

    if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let body = &rest[1..];
        let end = body.find(quote)?;
        let after = body[end + 1..].trim_start();
        let path = strip_prefix_ci(after, "to file ").or_else(|| strip_prefix_ci(after, "to "))?;
        let path = clean_path(path);
        return (!path.is_empty()).then(|| FileRequest::Write {
            path,
            content: body[..end].to_string(),
        });
    }

    // Lowercasing ASCII keeps byte offsets intact.
    let idx = rest.to_ascii_lowercase().rfind(" to file ")?;
    let path = clean_path(&rest[idx + " to file ".len()..]);
    (!path.is_empty()).then(|| FileRequest::Write {
        path,
        content: rest[..idx].to_string(),
    })
}
