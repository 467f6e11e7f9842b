//! Bounded, deadline-aware shell execution.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How long readers may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Empty command")]
    EmptyCommand,
    #[error("Failed to start shell: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub max_output_bytes: usize,
    pub shell: String,
    pub working_dir: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: "sh".to_string(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellResult {
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ShellResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

struct CappedBuffer {
    data: Vec<u8>,
    omitted: usize,
    limit: usize,
}

impl CappedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            omitted: 0,
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        let kept = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..kept]);
        self.omitted += chunk.len() - kept;
    }

    fn snapshot(&self) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.omitted > 0 {
            text.push_str(&format!(
                "\n[... output truncated: {} bytes omitted]",
                self.omitted
            ));
        }
        (text, self.omitted > 0)
    }
}

async fn drain<R>(mut reader: R, buffer: Arc<Mutex<CappedBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.lock().push(&chunk[..n]),
        }
    }
}

fn spawn_reader<R>(reader: Option<R>, buffer: &Arc<Mutex<CappedBuffer>>) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|r| tokio::spawn(drain(r, Arc::clone(buffer))))
}

async fn settle(handle: Option<JoinHandle<()>>) {
    if let Some(mut handle) = handle {
        if tokio::time::timeout(READER_GRACE, &mut handle).await.is_err() {
            // A detached grandchild still holds the pipe open.
            handle.abort();
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child called setsid, so its pid is also its process group id.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

pub struct ShellExecutor {
    config: ShellConfig,
}

impl ShellExecutor {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Runs `command` through the configured shell.
    ///
    /// A non-zero exit or an expired deadline is reported in the result, never
    /// as an error. On timeout the whole process group is killed and the output
    /// captured up to that point is returned.
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<ShellResult, ShellError> {
        if command.trim().is_empty() {
            return Err(ShellError::EmptyCommand);
        }

        info!(command = %command, timeout_ms = timeout.as_millis() as u64, "Executing shell command");

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so a timeout can take down everything the command started.
        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let started = Instant::now();
        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout_buf = Arc::new(Mutex::new(CappedBuffer::new(self.config.max_output_bytes)));
        let stderr_buf = Arc::new(Mutex::new(CappedBuffer::new(self.config.max_output_bytes)));
        let stdout_task = spawn_reader(child.stdout.take(), &stdout_buf);
        let stderr_task = spawn_reader(child.stderr.take(), &stderr_buf);

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!(command = %command, pid = ?pid, "Shell command timed out, killing process group");
                kill_group(pid);
                let _ = child.start_kill();
                let _ = child.wait().await;
                (None, true)
            }
        };

        settle(stdout_task).await;
        settle(stderr_task).await;

        let (stdout, stdout_truncated) = stdout_buf.lock().snapshot();
        let (stderr, stderr_truncated) = stderr_buf.lock().snapshot();
        let duration = started.elapsed();

        debug!(
            exit_code = ?exit_code,
            timed_out,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            duration_ms = duration.as_millis() as u64,
            "Shell command finished"
        );

        Ok(ShellResult {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration,
            timed_out,
        })
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}
