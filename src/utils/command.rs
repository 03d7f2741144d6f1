//! Builder for external tool invocations (git, docker, kubectl, sh).
//!
//! All external processes go through [`ToolCommand`], which gives them a uniform
//! timeout, debug logging under the program's tracing target, and conversion of
//! failures into [`DevflowError`] values.
//!
//! # Examples
//!
//! ```rust,no_run
//! use devflow_cli::utils::command::ToolCommand;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let branch = ToolCommand::git()
//!     .args(["rev-parse", "--abbrev-ref", "HEAD"])
//!     .current_dir("/path/to/repo")
//!     .execute_stdout()
//!     .await?;
//!
//! ToolCommand::docker()
//!     .args(["image", "inspect", "web:latest"])
//!     .execute_success()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::GIT_COMMAND_TIMEOUT;
use crate::core::DevflowError;
use crate::utils::output::OutputSink;

/// Number of trailing output lines kept for error messages of streamed commands.
const ERROR_TAIL_LINES: usize = 30;

/// Builder for a single external command.
pub struct ToolCommand {
    program: String,

    args: Vec<String>,

    current_dir: Option<PathBuf>,

    env_vars: Vec<(String, String)>,

    timeout_duration: Option<Duration>,

    /// Free-form label included in log lines (e.g. the dependency or image name).
    context: Option<String>,

    /// Repository URL for clone commands, reported in [`DevflowError::GitCloneFailed`].
    clone_url: Option<String>,
}

impl ToolCommand {
    /// Create a command for an arbitrary program without timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
            timeout_duration: None,
            context: None,
            clone_url: None,
        }
    }

    /// A git command with the default git timeout.
    pub fn git() -> Self {
        Self::new("git").with_timeout(Some(GIT_COMMAND_TIMEOUT))
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn kubectl() -> Self {
        Self::new("kubectl")
    }

    /// A `sh -c <script>` command.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub(crate) fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = Some(url.into());
        self
    }

    /// First non-flag argument, used to name the operation in errors and logs.
    fn operation(&self) -> String {
        if self.program == "sh" {
            return "script".to_string();
        }
        self.args
            .iter()
            .find(|arg| !arg.starts_with('-'))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn display_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            tracing::trace!(target: "devflow::command", "Setting env var: {}={}", key, value);
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn log_start(&self) {
        if let Some(ctx) = &self.context {
            tracing::debug!(target: "devflow::command", "({}) Executing command: {}", ctx, self.display_line());
        } else {
            tracing::debug!(target: "devflow::command", "Executing command: {}", self.display_line());
        }
    }

    fn log_elapsed(&self, start: Instant) {
        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::debug!(
                target: "devflow::command",
                "{} {} took {:.2}s",
                self.program,
                self.operation(),
                elapsed.as_secs_f64()
            );
        }
    }

    fn spawn_error(&self, error: std::io::Error) -> anyhow::Error {
        if self.program == "git" && error.kind() == std::io::ErrorKind::NotFound {
            return DevflowError::GitNotFound.into();
        }
        anyhow::Error::new(error).context(format!("Failed to execute {}", self.display_line()))
    }

    fn timeout_error(&self, duration: Duration) -> anyhow::Error {
        tracing::warn!(
            target: "devflow::command",
            "Command timed out after {} seconds: {}",
            duration.as_secs(),
            self.display_line()
        );
        DevflowError::CommandTimeout {
            program: self.program.clone(),
            operation: self.operation(),
            seconds: duration.as_secs(),
        }
        .into()
    }

    fn failure_error(&self, stderr: String) -> anyhow::Error {
        let operation = self.operation();
        let error = if self.program == "git" {
            match operation.as_str() {
                "clone" => DevflowError::GitCloneFailed {
                    url: self.clone_url.clone().unwrap_or_else(|| "unknown".to_string()),
                    reason: stderr,
                },
                "checkout" => DevflowError::GitCheckoutFailed {
                    reference: self.args.iter().skip(1).find(|a| !a.starts_with('-')).cloned().unwrap_or_default(),
                    reason: stderr,
                },
                _ => DevflowError::GitCommandError {
                    operation,
                    stderr,
                },
            }
        } else {
            DevflowError::CommandFailed {
                program: self.program.clone(),
                operation,
                stderr,
            }
        };
        error.into()
    }

    /// Run the command, capturing stdout and stderr.
    ///
    /// Fails when the program cannot be started, exits non-zero or exceeds the timeout.
    pub async fn execute(self) -> Result<CommandOutput> {
        let start = Instant::now();
        self.log_start();

        let mut cmd = self.build();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output_future = cmd.output();
        let output = if let Some(duration) = self.timeout_duration {
            match timeout(duration, output_future).await {
                Ok(result) => result.map_err(|e| self.spawn_error(e))?,
                Err(_) => return Err(self.timeout_error(duration)),
            }
        } else {
            output_future.await.map_err(|e| self.spawn_error(e))?
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "devflow::command",
                "Command failed with exit code: {:?}",
                output.status.code()
            );
            let message = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            return Err(self.failure_error(message));
        }

        if !stdout.trim().is_empty() {
            tracing::trace!(target: "devflow::command", "{}", stdout.trim());
        }
        self.log_elapsed(start);

        Ok(CommandOutput {
            stdout,
            stderr,
        })
    }

    /// Run the command and return its trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run the command, discarding its output.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }

    /// Run the command and report only whether it succeeded.
    pub async fn succeeds(self) -> bool {
        self.execute().await.is_ok()
    }

    /// Run the command, forwarding stdout and stderr line by line to `sink`.
    ///
    /// On failure the error carries the trailing lines of the combined output.
    pub async fn execute_streaming(self, sink: &OutputSink) -> Result<()> {
        let start = Instant::now();
        self.log_start();

        let mut cmd = self.build();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tail = Mutex::new(VecDeque::with_capacity(ERROR_TAIL_LINES));

        let run = async {
            let (_, _, status) =
                tokio::join!(pump(stdout, sink, &tail), pump(stderr, sink, &tail), child.wait());
            status
        };

        let waited = match self.timeout_duration {
            Some(duration) => timeout(duration, run).await.ok(),
            None => Some(run.await),
        };
        let Some(status) = waited else {
            let _ = child.kill().await;
            return Err(self.timeout_error(self.timeout_duration.unwrap_or_default()));
        };
        let status =
            status.with_context(|| format!("Failed to wait for {}", self.display_line()))?;

        if !status.success() {
            let lines: Vec<String> =
                tail.lock().map(|t| t.iter().cloned().collect()).unwrap_or_default();
            return Err(self.failure_error(lines.join("\n")));
        }

        self.log_elapsed(start);
        Ok(())
    }
}

async fn pump<R>(reader: Option<R>, sink: &OutputSink, tail: &Mutex<VecDeque<String>>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.line(&line);
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == ERROR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

/// Captured output of a finished command.
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}
