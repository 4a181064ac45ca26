//! Subprocess runner: turns an [`Operation`] into one transcoder invocation.
//!
//! Every run gets a fresh [`Workspace`]; the tool writes `output.<ext>`
//! there, and on success the file is moved to the caller-supplied artifact
//! path. The workspace is dropped (and removed) before [`Runner::execute`]
//! returns, on every path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use mr_core::config::JobsConfig;
use mr_core::Error;

use crate::command::{stderr_summary, ToolCommand};
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Longest single argument accepted.
const MAX_ARG_LEN: usize = 4096;

/// Longest accepted output extension.
const MAX_EXT_LEN: usize = 10;

/// Arguments placed before the input on every invocation.
const LEADING_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y"];

/// The transformation a job asks the transcoder to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Operation {
    /// Arguments inserted between the input and the output path.
    pub args: Vec<String>,
    /// Extension of the produced artifact (e.g. `mp4`).
    pub output_ext: String,
}

impl Operation {
    /// Check the operation and its input against the job limits.
    pub fn validate(&self, input: &str, limits: &JobsConfig) -> mr_core::Result<()> {
        validate_input(input, &limits.allowed_input_prefixes)?;

        if self.args.len() > limits.max_args {
            return Err(Error::Validation(format!(
                "too many arguments: {} (max {})",
                self.args.len(),
                limits.max_args
            )));
        }
        for (i, arg) in self.args.iter().enumerate() {
            if arg.contains('\0') {
                return Err(Error::Validation(format!("argument {i} contains a NUL byte")));
            }
            if arg.len() > MAX_ARG_LEN {
                return Err(Error::Validation(format!(
                    "argument {i} is longer than {MAX_ARG_LEN} bytes"
                )));
            }
        }

        let ext = &self.output_ext;
        if ext.is_empty()
            || ext.len() > MAX_EXT_LEN
            || !ext.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Validation(format!(
                "output_ext must be 1-{MAX_EXT_LEN} ASCII letters or digits, got {ext:?}"
            )));
        }

        Ok(())
    }

    /// Full argument vector for the transcoder, output path last.
    pub fn command_args(&self, input: &str, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = LEADING_ARGS.iter().map(|s| s.to_string()).collect();
        args.push("-i".to_string());
        args.push(input.to_string());
        args.extend(self.args.iter().cloned());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

fn validate_input(input: &str, allowed_prefixes: &[String]) -> mr_core::Result<()> {
    if input.trim().is_empty() {
        return Err(Error::Validation("input must not be empty".into()));
    }
    if input.contains('\0') {
        return Err(Error::Validation("input contains a NUL byte".into()));
    }
    if input.starts_with('-') {
        return Err(Error::Validation(format!(
            "input must not start with '-': {input:?}"
        )));
    }
    if !allowed_prefixes.is_empty() && !allowed_prefixes.iter().any(|p| input.starts_with(p.as_str()))
    {
        return Err(Error::Validation(format!(
            "input {input:?} is outside the allowed locations"
        )));
    }
    Ok(())
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Where the artifact now lives.
    pub artifact: PathBuf,
    /// Artifact size in bytes.
    pub bytes: u64,
    /// Wall-clock time the tool ran.
    pub elapsed: Duration,
    /// Last lines of the tool's diagnostic output.
    pub stderr_tail: String,
}

/// Executes operations with the discovered transcoder.
#[derive(Debug, Clone)]
pub struct Runner {
    tools: Arc<ToolRegistry>,
    work_root: Option<PathBuf>,
}

impl Runner {
    /// Create a runner. Workspaces go under `work_root`, or the system temp
    /// dir when `None`.
    pub fn new(tools: Arc<ToolRegistry>, work_root: Option<PathBuf>) -> Self {
        Self { tools, work_root }
    }

    /// Run `op` on `input`, bounded by `deadline`, and move the artifact to
    /// `dest`.
    ///
    /// # Errors
    ///
    /// - [`Error::SpawnFailed`] if the transcoder is missing or won't start.
    /// - [`Error::NonZeroExit`] if it reported failure.
    /// - [`Error::TimedOut`] / [`Error::Cancelled`] after the process group
    ///   was killed.
    /// - [`Error::Io`] / [`Error::Internal`] for workspace problems,
    ///   including a successful exit that produced no output file.
    pub async fn execute(
        &self,
        op: &Operation,
        input: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        dest: &Path,
    ) -> mr_core::Result<RunOutput> {
        let tool = self
            .tools
            .require_transcoder()
            .map_err(|e| Error::spawn_failed(self.tools.transcoder_name(), e.to_string()))?;

        let workspace = Workspace::new(self.work_root.as_deref())?;
        let output_path = workspace.output(&op.output_ext);

        let mut cmd = ToolCommand::new(tool.path);
        cmd.args(op.command_args(input, &output_path))
            .timeout(deadline);

        tracing::debug!(
            workspace = %workspace.path().display(),
            args = ?cmd.get_args(),
            "Running transcoder"
        );

        let started = Instant::now();
        let output = cmd.execute_with_cancel(cancel).await?;
        let elapsed = started.elapsed();

        let bytes = workspace.persist_output(&op.output_ext, dest)?;

        Ok(RunOutput {
            artifact: dest.to_path_buf(),
            bytes,
            elapsed,
            stderr_tail: stderr_summary(&output.stderr),
        })
    }
}
