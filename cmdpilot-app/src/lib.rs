pub mod cli;
pub mod config;
pub mod health;
pub mod logging;
pub mod repl;

use anyhow::{ensure, Context, Result};
use cli::{Cli, Mode};
use cmdpilot_core::{Agent, TracingEventSink};
use cmdpilot_executor::ShellExecutor;
use cmdpilot_providers::{AnyBackend, Backend};
use cmdpilot_tools::FileManipulator;
use config::AppConfig;
use repl::Repl;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Wires the agent from resolved configuration. Shell commands and file
/// operations share the workspace directory.
pub fn build_agent<B: Backend>(backend: B, config: &AppConfig) -> Agent<B> {
    Agent::new(
        backend,
        ShellExecutor::new(config.shell_config()),
        FileManipulator::new(&config.workspace),
        config.command_policy.clone(),
        Arc::new(TracingEventSink),
        config.agent_settings(),
    )
}

/// Dispatches one instruction without a session and prints its text.
/// Returns whether the cycle completed.
pub async fn run_single<B: Backend, W: Write>(
    agent: &Agent<B>,
    instruction: &str,
    out: &mut W,
) -> io::Result<bool> {
    let outcome = agent.dispatch(instruction, None).await;
    writeln!(out, "{}", outcome.text)?;
    Ok(outcome.succeeded())
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::resolve(&cli)?;
    let log_path = logging::init(config.log_dir.as_deref())?;

    info!(
        backend = config.backend.kind(),
        target = %config.backend.target(),
        workspace = %config.workspace.display(),
        log_file = ?log_path,
        "Starting cmdpilot"
    );

    let backend = AnyBackend::from_config(&config.backend, &config.backend_settings())
        .with_context(|| format!("Failed to initialize {} backend", config.backend.kind()))?;

    let mode = cli.mode();
    if mode == Mode::Check {
        let healthy = health::check(&backend, &config, &mut io::stdout()).await?;
        return Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    ensure!(
        config.workspace.is_dir(),
        "Workspace {} is not a directory",
        config.workspace.display()
    );

    let agent = build_agent(backend, &config);

    match mode {
        Mode::Single(instruction) => {
            let completed = run_single(&agent, &instruction, &mut io::stdout()).await?;
            Ok(if completed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        _ => {
            let mut repl = Repl::new(&agent, config.history_capacity);
            let stdin = io::stdin();
            repl.run(stdin.lock(), &mut io::stdout()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
