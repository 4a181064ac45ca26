//! Job model and its state machine.
//!
//! A job moves `Queued -> Running -> {Succeeded, Failed, TimedOut}`. A queued
//! job may also go straight to `Failed` when cancelled before it gets a
//! slot. Terminal states are final: every transition method returns `false`
//! instead of overwriting an outcome.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mr_av::Operation;
use mr_core::{Error, JobId};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Why a job did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobFailure {
    /// Stable machine kind (`spawn_failed`, `non_zero_exit`, `timed_out`,
    /// `cancelled`, ...).
    pub kind: String,
    /// Human-readable detail, for tool failures the tail of stderr.
    pub detail: String,
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        let detail = match err {
            Error::NonZeroExit { detail, status, .. } if !detail.is_empty() => {
                format!("{status}: {detail}")
            }
            other => other.to_string(),
        };
        Self {
            kind: err.code().to_string(),
            detail,
        }
    }
}

/// A produced output file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// A unit of work, owned by the coordinator.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input: String,
    pub operation: Operation,
    pub timeout: Duration,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact: Option<Artifact>,
    pub failure: Option<JobFailure>,
    pub stderr_tail: Option<String>,
}

impl Job {
    pub fn new(input: String, operation: Operation, timeout: Duration) -> Self {
        Self {
            id: JobId::new(),
            input,
            operation,
            timeout,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifact: None,
            failure: None,
            stderr_tail: None,
        }
    }

    /// `Queued -> Running`.
    pub fn start(&mut self) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// `Running -> Succeeded`.
    pub fn succeed(&mut self, artifact: Artifact, stderr_tail: String) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.state = JobState::Succeeded;
        self.finished_at = Some(Utc::now());
        self.artifact = Some(artifact);
        if !stderr_tail.is_empty() {
            self.stderr_tail = Some(stderr_tail);
        }
        true
    }

    /// Any non-terminal state to `Failed`, or `TimedOut` for a deadline.
    pub fn fail(&mut self, err: &Error) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = match err {
            Error::TimedOut { .. } => JobState::TimedOut,
            _ => JobState::Failed,
        };
        self.finished_at = Some(Utc::now());
        self.failure = Some(JobFailure::from(err));
        true
    }

    pub fn view(&self) -> JobView {
        let duration_ms = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        };
        JobView {
            id: self.id.to_string(),
            input: self.input.clone(),
            args: self.operation.args.clone(),
            output_ext: self.operation.output_ext.clone(),
            timeout_secs: self.timeout.as_secs(),
            state: self.state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms,
            artifact_bytes: self.artifact.as_ref().map(|a| a.bytes),
            failure: self.failure.clone(),
            stderr_tail: self.stderr_tail.clone(),
        }
    }
}

/// Read-only snapshot of a job, as returned to API clients.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobView {
    pub id: String,
    pub input: String,
    pub args: Vec<String>,
    pub output_ext: String,
    pub timeout_secs: u64,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub artifact_bytes: Option<u64>,
    pub failure: Option<JobFailure>,
    pub stderr_tail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "in.mkv".into(),
            Operation {
                args: vec!["-c".into(), "copy".into()],
                output_ext: "mp4".into(),
            },
            Duration::from_secs(60),
        )
    }

    #[test]
    fn happy_path() {
        let mut job = job();
        assert!(job.start());
        assert!(job.succeed(
            Artifact {
                path: "/tmp/a.mp4".into(),
                bytes: 42
            },
            String::new()
        ));
        let view = job.view();
        assert_eq!(view.state, JobState::Succeeded);
        assert_eq!(view.artifact_bytes, Some(42));
        assert!(view.duration_ms.is_some());
        assert!(view.stderr_tail.is_none());
    }

    #[test]
    fn terminal_state_is_final() {
        let mut job = job();
        job.start();
        assert!(job.fail(&Error::TimedOut {
            tool: "ffmpeg".into(),
            after: Duration::from_secs(1),
        }));
        assert_eq!(job.state, JobState::TimedOut);

        assert!(!job.fail(&Error::Cancelled("late".into())));
        assert!(!job.start());
        assert_eq!(job.state, JobState::TimedOut);
        assert_eq!(job.failure.as_ref().unwrap().kind, "timed_out");
    }

    #[test]
    fn queued_job_can_be_cancelled() {
        let mut job = job();
        assert!(job.fail(&Error::Cancelled("by client".into())));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.unwrap().kind, "cancelled");
        assert!(job.started_at.is_none());
    }

    #[test]
    fn succeed_requires_running() {
        let mut job = job();
        let artifact = Artifact {
            path: "/tmp/a.mp4".into(),
            bytes: 1,
        };
        assert!(!job.succeed(artifact, String::new()));
        assert_eq!(job.state, JobState::Queued);
    }

    #[test]
    fn failure_from_non_zero_exit_keeps_detail() {
        let err = Error::NonZeroExit {
            tool: "ffmpeg".into(),
            status: "exit status: 1".into(),
            detail: "Unknown encoder 'x'".into(),
        };
        let failure = JobFailure::from(&err);
        assert_eq!(failure.kind, "non_zero_exit");
        assert_eq!(failure.detail, "exit status: 1: Unknown encoder 'x'");
    }

    #[test]
    fn view_serializes_state_snake_case() {
        let json = serde_json::to_value(job().view()).unwrap();
        assert_eq!(json["state"], "queued");
        assert_eq!(json["output_ext"], "mp4");
    }
}
