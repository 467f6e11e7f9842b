#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use cmdpilot_app::config::AppConfig;
use cmdpilot_app::repl::Repl;
use cmdpilot_app::{build_agent, health, run_single};
use cmdpilot_providers::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _options: &GenerationOptions) -> CompletionResult {
        self.prompts.lock().push(prompt.to_string());
        match self.replies.lock().pop_front() {
            Some(text) => Ok(Completion {
                text,
                tokens: None,
                latency: Duration::from_millis(1),
            }),
            None => Err(BackendError::InvalidResponse("script exhausted".to_string())),
        }
    }
}

fn workspace_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        workspace: dir.path().to_path_buf(),
        retry_backoff_ms: 10,
        shell_timeout_secs: 5,
        ..AppConfig::default()
    }
}

async fn drive(backend: Arc<ScriptedBackend>, config: &AppConfig, script: &str) -> (String, usize) {
    let agent = build_agent(backend, config);
    let mut repl = Repl::new(&agent, config.history_capacity);
    let mut out = Vec::new();
    repl.run(Cursor::new(script.to_string()), &mut out).await.unwrap();
    (String::from_utf8(out).unwrap(), repl.session().len())
}

#[tokio::test]
async fn test_builtins_and_exit() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(&[]);
    let (out, turns) = drive(
        Arc::clone(&backend),
        &workspace_config(&dir),
        "help\nhistory\n\nEXIT\nrun echo never\n",
    )
    .await;

    assert!(out.contains("cmdpilot ready (backend: scripted)"));
    assert!(out.contains("history     - Show previous instructions"));
    assert!(out.contains("No history yet."));
    assert!(out.contains("Goodbye!"));
    assert!(!out.contains("never"));
    assert_eq!(turns, 0);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_shell_instruction_recorded_in_history() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(&[]);
    let (out, turns) = drive(
        Arc::clone(&backend),
        &workspace_config(&dir),
        "run echo hello-repl\nhistory\nquit\n",
    )
    .await;

    assert!(out.contains("\nhello-repl\n"));
    assert!(out.contains("1. [ok] run echo hello-repl -> hello-repl"));
    assert_eq!(turns, 1);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_clear_forgets_history() {
    let dir = TempDir::new().unwrap();
    let (out, turns) = drive(
        ScriptedBackend::new(&[]),
        &workspace_config(&dir),
        "run echo one\nclear\nhistory\n",
    )
    .await;

    assert!(out.contains("History cleared."));
    assert!(out.contains("No history yet."));
    assert_eq!(turns, 0);
}

#[tokio::test]
async fn test_end_of_input_ends_session() {
    let dir = TempDir::new().unwrap();
    let (out, turns) = drive(ScriptedBackend::new(&[]), &workspace_config(&dir), "run echo last").await;
    assert!(out.contains("last"));
    assert!(!out.contains("Goodbye!"));
    assert_eq!(turns, 1);
}

#[tokio::test]
async fn test_failures_are_labelled_and_session_continues() {
    let dir = TempDir::new().unwrap();
    let (out, turns) = drive(
        ScriptedBackend::new(&[]),
        &workspace_config(&dir),
        "read file missing.txt\nrun echo still-here\nhistory\n",
    )
    .await;

    assert!(out.contains("Error [file_not_found]"));
    assert!(out.contains("still-here"));
    assert!(out.contains("1. [failed] read file missing.txt"));
    assert_eq!(turns, 2);
}

#[tokio::test]
async fn test_follow_up_question_sees_previous_turn() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(&[
        "ACTION: respond\nCONTENT: Noted, pineapple.",
        "ACTION: respond\nCONTENT: You said pineapple.",
    ]);
    let (out, turns) = drive(
        Arc::clone(&backend),
        &workspace_config(&dir),
        "remember the word pineapple\nwhat word did I say?\nexit\n",
    )
    .await;

    assert!(out.contains("You said pineapple."));
    assert_eq!(turns, 2);
    assert_eq!(backend.calls(), 2);
    let second = backend.prompts.lock()[1].clone();
    assert!(second.contains("User: remember the word pineapple"));
}

#[tokio::test]
async fn test_run_single_reports_status() {
    let dir = TempDir::new().unwrap();
    let config = workspace_config(&dir);
    let agent = build_agent(ScriptedBackend::new(&[]), &config);

    let mut out = Vec::new();
    assert!(run_single(&agent, "run echo single", &mut out).await.unwrap());
    assert_eq!(String::from_utf8(out).unwrap(), "single\n");

    let mut out = Vec::new();
    assert!(!run_single(&agent, "read file nope.txt", &mut out).await.unwrap());
}

#[tokio::test]
async fn test_run_single_keeps_no_state() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(&[
        "ACTION: respond\nCONTENT: ok",
        "ACTION: respond\nCONTENT: ok",
    ]);
    let agent = build_agent(Arc::clone(&backend), &workspace_config(&dir));

    run_single(&agent, "remember the word pineapple", &mut Vec::new()).await.unwrap();
    run_single(&agent, "what word did I say?", &mut Vec::new()).await.unwrap();
    assert!(!backend.prompts.lock()[1].contains("pineapple"));
}

#[tokio::test]
async fn test_health_check_direct_backend() {
    let dir = TempDir::new().unwrap();
    let weights = dir.path().join("weights");
    std::fs::create_dir(&weights).unwrap();
    std::fs::write(weights.join("model.safetensors"), b"\x01\x02\x03\x04").unwrap();

    let config = AppConfig {
        backend: BackendConfig::Direct {
            model_path: weights.clone(),
        },
        ..workspace_config(&dir)
    };
    let backend = AnyBackend::from_config(&config.backend, &config.backend_settings()).unwrap();

    let mut out = Vec::new();
    let healthy = health::check(&backend, &config, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(healthy, "{}", out);
    assert!(out.contains("All checks passed"));
}

#[tokio::test]
async fn test_health_check_unreachable_api() {
    let dir = TempDir::new().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = AppConfig {
        backend: BackendConfig::Api {
            base_url: format!("http://127.0.0.1:{}", port),
        },
        request_timeout_secs: 2,
        connect_timeout_secs: 1,
        ..workspace_config(&dir)
    };
    let backend = AnyBackend::from_config(&config.backend, &config.backend_settings()).unwrap();

    let mut out = Vec::new();
    let healthy = health::check(&backend, &config, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(!healthy);
    assert!(out.contains("Backend api"));
    assert!(out.contains("Health check failed"));
}
