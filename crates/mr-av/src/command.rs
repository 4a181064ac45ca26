//! Builder for executing external tool commands with timeout and
//! cancellation support.
//!
//! The child is started in its own process group so that a timeout or a
//! cancellation can kill the tool together with anything it spawned. The
//! child is always reaped before [`ToolCommand::execute_with_cancel`]
//! returns.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on captured bytes per stream. Older output is discarded.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// How long to wait for the output pipes to close after the child is reaped.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8, tail only).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8, tail only).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// Arguments are passed as a discrete vector; no shell is involved.
///
/// # Example
///
/// ```no_run
/// use mr_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> mr_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-version")
///     .timeout(Duration::from_secs(10))
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Short program name used in errors and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    pub async fn execute(&self) -> mr_core::Result<ToolOutput> {
        self.execute_with_cancel(&CancellationToken::new()).await
    }

    /// Execute the command, aborting early if `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`mr_core::Error::SpawnFailed`] if the process could not be started.
    /// - [`mr_core::Error::TimedOut`] if the deadline passed. The process
    ///   group has been killed and the child reaped.
    /// - [`mr_core::Error::Cancelled`] if `cancel` fired first. Same cleanup
    ///   as a timeout.
    /// - [`mr_core::Error::NonZeroExit`] if the process exited unsuccessfully
    ///   (detail is the tail of stderr).
    pub async fn execute_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> mr_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| mr_core::Error::spawn_failed(&program_name, e.to_string()))?;

        let stdout = child.stdout.take().map(|s| tokio::spawn(read_tail(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

        tracing::debug!(tool = %program_name, pid = ?child.id(), "Spawned tool process");

        enum Outcome {
            Exited(std::io::Result<ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let outcome = tokio::select! {
            biased;
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let status = match outcome {
            Outcome::Exited(Ok(status)) => status,
            Outcome::Exited(Err(e)) => {
                terminate(&mut child, &program_name).await;
                return Err(mr_core::Error::Internal(format!(
                    "I/O error waiting for {program_name}: {e}"
                )));
            }
            Outcome::TimedOut => {
                terminate(&mut child, &program_name).await;
                tracing::warn!(tool = %program_name, timeout = ?self.timeout, "Tool timed out; killed");
                return Err(mr_core::Error::TimedOut {
                    tool: program_name,
                    after: self.timeout,
                });
            }
            Outcome::Cancelled => {
                terminate(&mut child, &program_name).await;
                tracing::info!(tool = %program_name, "Tool cancelled; killed");
                return Err(mr_core::Error::Cancelled(format!("{program_name} was cancelled")));
            }
        };

        let output = ToolOutput {
            status,
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        };

        if !status.success() {
            return Err(mr_core::Error::NonZeroExit {
                tool: program_name,
                status: status.to_string(),
                detail: stderr_summary(&output.stderr),
            });
        }

        Ok(output)
    }
}

/// Kill the child's whole process group, then reap the child.
async fn terminate(child: &mut Child, program_name: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::debug!(tool = %program_name, pid, error = %e, "killpg failed");
            }
        }
    }

    // `kill` sends SIGKILL to the direct child (a no-op if already dead) and
    // waits for it, so no zombie is left behind.
    if let Err(e) = child.kill().await {
        tracing::debug!(tool = %program_name, error = %e, "Failed to reap killed child");
    }
}

/// Read a stream to EOF, keeping only the last [`MAX_CAPTURE_BYTES`].
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&buf[..n]);
                if kept.len() > MAX_CAPTURE_BYTES {
                    let excess = kept.len() - MAX_CAPTURE_BYTES;
                    kept.drain(..excess);
                }
            }
        }
    }
    kept
}

async fn collect(handle: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        _ => String::new(),
    }
}

/// Condense diagnostic output to its last few non-empty lines.
pub fn stderr_summary(stderr: &str) -> String {
    const MAX_LINES: usize = 5;
    const MAX_CHARS: usize = 1000;

    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    let summary = lines[start..].join("\n");

    if summary.chars().count() > MAX_CHARS {
        let skip = summary.chars().count() - MAX_CHARS;
        summary.chars().skip(skip).collect()
    } else {
        summary
    }
}
