//! Job coordinator.
//!
//! The coordinator accepts submissions through the [`SlotPool`], spawns one
//! task per admitted job, and owns each [`Job`] until it is terminal.
//! Terminal jobs stay queryable until retention evicts them.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use mr_av::{Operation, RunOutput, Runner};
use mr_core::config::JobsConfig;
use mr_core::events::{EventBus, EventPayload};
use mr_core::{Error, JobId, Readiness};

use crate::admission::{SlotPool, SlotSnapshot, Ticket};
use crate::job::{Artifact, Job, JobState, JobView};

/// How long cancelled jobs get to clean up during a drain.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// A request to run one operation.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub input: String,
    pub operation: Operation,
    pub timeout_secs: Option<u64>,
}

/// Counts over the job table plus the slot pool snapshot.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct JobStats {
    pub slots: SlotSnapshot,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub retained: usize,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    state_tx: watch::Sender<JobState>,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<JobId, JobEntry>,
    /// Terminal jobs, oldest first.
    finished: VecDeque<JobId>,
}

/// Where artifacts live until their job is evicted or removed.
#[derive(Debug)]
struct ArtifactStore {
    root: PathBuf,
    _temp: Option<TempDir>,
}

impl ArtifactStore {
    fn open(dir: Option<&Path>) -> mr_core::Result<Self> {
        match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(Self {
                    root: dir.to_path_buf(),
                    _temp: None,
                })
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("mr-artifacts-")
                    .tempdir()?;
                Ok(Self {
                    root: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }

    fn path_for(&self, id: JobId, ext: &str) -> PathBuf {
        self.root.join(format!("{id}.{ext}"))
    }
}

/// How a job ended, carried from the terminal transition to its announcement.
enum Finished {
    Succeeded { bytes: u64, elapsed: Duration },
    Failed(Error),
}

/// Whether a run says anything about the transcoder starting. Failures that
/// happen before a spawn attempt, such as a workspace that can't be created,
/// say nothing.
fn spawn_outcome(result: &mr_core::Result<RunOutput>) -> Option<bool> {
    match result {
        Ok(_) => Some(true),
        Err(Error::SpawnFailed { .. }) => Some(false),
        Err(Error::NonZeroExit { .. } | Error::TimedOut { .. }) => Some(true),
        Err(_) => None,
    }
}

fn discard_artifact(job: &Job) {
    if let Some(ref artifact) = job.artifact {
        if let Err(e) = std::fs::remove_file(&artifact.path) {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove artifact");
        }
    }
}

/// Owns job lifecycles and the admission decision.
pub struct Coordinator {
    config: JobsConfig,
    runner: Runner,
    pool: Arc<SlotPool>,
    events: Arc<EventBus>,
    jobs: RwLock<JobTable>,
    artifacts: ArtifactStore,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        config: JobsConfig,
        runner: Runner,
        pool: Arc<SlotPool>,
        events: Arc<EventBus>,
    ) -> mr_core::Result<Arc<Self>> {
        let artifacts = ArtifactStore::open(config.artifact_dir.as_deref())?;
        tracing::debug!(dir = %artifacts.root.display(), "Artifact store ready");

        Ok(Arc::new(Self {
            config,
            runner,
            pool,
            events,
            jobs: RwLock::new(JobTable::default()),
            artifacts,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }

    /// Validate and admit a job, then start it in the background.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed request (no job is created).
    /// - [`Error::NotReady`] / [`Error::Overloaded`] when admission refuses.
    pub fn submit(self: &Arc<Self>, request: SubmitRequest) -> mr_core::Result<JobId> {
        self.admit(request).map(|(id, _)| id)
    }

    /// [`Self::submit`], then wait up to `timeout` for the outcome. The job
    /// is watched from the moment it is admitted, so retention can't evict it
    /// before the result is read.
    pub async fn submit_and_wait(
        self: &Arc<Self>,
        request: SubmitRequest,
        timeout: Duration,
    ) -> mr_core::Result<JobView> {
        let (id, rx) = self.admit(request)?;
        self.wait_on(id, rx, Some(timeout)).await
    }

    fn admit(
        self: &Arc<Self>,
        request: SubmitRequest,
    ) -> mr_core::Result<(JobId, watch::Receiver<JobState>)> {
        request
            .operation
            .validate(&request.input, &self.config)?;

        let ticket = match self.pool.try_admit() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::debug!(reason = %e, "Submission rejected");
                self.events.broadcast(EventPayload::SubmissionRejected {
                    reason: e.code().to_string(),
                });
                return Err(e);
            }
        };

        let timeout = self.config.effective_timeout(request.timeout_secs);
        let job = Job::new(request.input, request.operation, timeout);
        let id = job.id;
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(JobState::Queued);

        self.jobs.write().entries.insert(
            id,
            JobEntry {
                job,
                cancel: cancel.clone(),
                state_tx,
            },
        );

        tracing::info!(job_id = %id, timeout = ?timeout, "Job queued");
        self.events.broadcast(EventPayload::JobQueued { job_id: id });

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_job(id, ticket, cancel).await;
        });

        Ok((id, state_rx))
    }

    async fn run_job(self: Arc<Self>, id: JobId, ticket: Ticket, cancel: CancellationToken) {
        let slot = tokio::select! {
            slot = ticket.acquire() => slot,
            _ = cancel.cancelled() => Err(Error::Cancelled("cancelled while queued".into())),
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => {
                let finished = self.finish(id, |job| job.fail(&e));
                drop(ticket);
                if finished {
                    self.publish(id, Finished::Failed(e));
                }
                return;
            }
        };

        let Some((input, operation, timeout)) = self.start(id) else {
            return;
        };

        let dest = self.artifacts.path_for(id, &operation.output_ext);
        let result = self
            .runner
            .execute(&operation, &input, timeout, &cancel, &dest)
            .await;

        if let Some(spawned) = spawn_outcome(&result) {
            self.pool.record_spawn(spawned);
        }

        // The job leaves `Running` while it still holds its slot, so the
        // table never shows more running jobs than there are slots.
        let finished = match result {
            Ok(output) => {
                let artifact = Artifact {
                    path: output.artifact,
                    bytes: output.bytes,
                };
                let path = artifact.path.clone();
                let bytes = artifact.bytes;
                if self.finish(id, |job| job.succeed(artifact, output.stderr_tail)) {
                    Some(Finished::Succeeded {
                        bytes,
                        elapsed: output.elapsed,
                    })
                } else {
                    let _ = std::fs::remove_file(&path);
                    None
                }
            }
            Err(e) => self
                .finish(id, |job| job.fail(&e))
                .then_some(Finished::Failed(e)),
        };

        // Capacity is free before anyone hears about the outcome, so a client
        // that observes completion can submit again right away.
        drop(slot);
        drop(ticket);

        if let Some(finished) = finished {
            self.publish(id, finished);
        }
        self.enforce_retention();
    }

    /// `Queued -> Running`; returns what the runner needs.
    fn start(&self, id: JobId) -> Option<(String, Operation, Duration)> {
        let mut table = self.jobs.write();
        let entry = table.entries.get_mut(&id)?;
        if !entry.job.start() {
            return None;
        }
        entry.state_tx.send_replace(JobState::Running);
        let started = (
            entry.job.input.clone(),
            entry.job.operation.clone(),
            entry.job.timeout,
        );
        drop(table);

        tracing::info!(job_id = %id, "Job started");
        self.events.broadcast(EventPayload::JobStarted { job_id: id });
        Some(started)
    }

    /// Apply a terminal transition and queue the job for retention. Waiters
    /// are not woken until [`Self::publish`].
    fn finish(&self, id: JobId, apply: impl FnOnce(&mut Job) -> bool) -> bool {
        let mut table = self.jobs.write();
        let Some(entry) = table.entries.get_mut(&id) else {
            return false;
        };
        if !apply(&mut entry.job) {
            return false;
        }
        table.finished.push_back(id);
        true
    }

    /// Wake waiters on a finished job, then log and broadcast the outcome.
    fn publish(&self, id: JobId, finished: Finished) {
        if let Some(entry) = self.jobs.read().entries.get(&id) {
            entry.state_tx.send_replace(entry.job.state);
        }

        match finished {
            Finished::Succeeded { bytes, elapsed } => {
                tracing::info!(job_id = %id, bytes, elapsed = ?elapsed, "Job succeeded");
                self.events.broadcast(EventPayload::JobSucceeded {
                    job_id: id,
                    artifact_bytes: bytes,
                });
            }
            Finished::Failed(err @ Error::TimedOut { .. }) => {
                tracing::warn!(job_id = %id, error = %err, "Job timed out");
                self.events.broadcast(EventPayload::JobTimedOut { job_id: id });
            }
            Finished::Failed(err) => {
                tracing::error!(job_id = %id, error = %err, "Job failed");
                self.events.broadcast(EventPayload::JobFailed {
                    job_id: id,
                    kind: err.code().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    /// Evict the oldest finished jobs beyond `max_retained`. Jobs someone is
    /// waiting on are skipped until their waiters have read them.
    fn enforce_retention(&self) {
        let evicted: Vec<Job> = {
            let mut table = self.jobs.write();
            let mut excess = table.finished.len().saturating_sub(self.config.max_retained);
            let mut watched = Vec::new();
            let mut evicted = Vec::new();
            while excess > 0 {
                let Some(old) = table.finished.pop_front() else {
                    break;
                };
                match table.entries.get(&old) {
                    Some(entry) if entry.state_tx.receiver_count() > 0 => watched.push(old),
                    Some(_) => {
                        if let Some(entry) = table.entries.remove(&old) {
                            evicted.push(entry.job);
                        }
                        excess -= 1;
                    }
                    None => excess -= 1,
                }
            }
            for id in watched.into_iter().rev() {
                table.finished.push_front(id);
            }
            evicted
        };

        for job in &evicted {
            tracing::debug!(job_id = %job.id, "Evicting finished job");
            discard_artifact(job);
        }
    }

    /// Current view of a job. Stable once the job is terminal.
    pub fn status(&self, id: JobId) -> Option<JobView> {
        self.jobs.read().entries.get(&id).map(|e| e.job.view())
    }

    /// Path and size of a succeeded job's artifact.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown job, [`Error::Conflict`] if the job
    /// has not succeeded.
    pub fn artifact(&self, id: JobId) -> mr_core::Result<(Artifact, String)> {
        let table = self.jobs.read();
        let entry = table
            .entries
            .get(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        match (&entry.job.state, &entry.job.artifact) {
            (JobState::Succeeded, Some(artifact)) => {
                Ok((artifact.clone(), entry.job.operation.output_ext.clone()))
            }
            (state, _) => Err(Error::Conflict(format!(
                "job {id} has no artifact (state: {state})"
            ))),
        }
    }

    /// Wait until the job is terminal or `timeout` elapses, then return its
    /// view.
    pub async fn wait(&self, id: JobId, timeout: Option<Duration>) -> mr_core::Result<JobView> {
        let rx = {
            let table = self.jobs.read();
            let entry = table
                .entries
                .get(&id)
                .ok_or_else(|| Error::not_found("job", id))?;
            entry.state_tx.subscribe()
        };
        self.wait_on(id, rx, timeout).await
    }

    async fn wait_on(
        &self,
        id: JobId,
        mut rx: watch::Receiver<JobState>,
        timeout: Option<Duration>,
    ) -> mr_core::Result<JobView> {
        let terminal = rx.wait_for(|state| state.is_terminal());
        match timeout {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, terminal).await;
            }
            None => {
                let _ = terminal.await;
            }
        }

        self.status(id).ok_or_else(|| Error::not_found("job", id))
    }

    /// Cancel a queued or running job. Its subprocess is killed and it ends
    /// `Failed` with kind `cancelled`.
    pub fn cancel(&self, id: JobId) -> mr_core::Result<()> {
        let table = self.jobs.read();
        let entry = table
            .entries
            .get(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        if entry.job.state.is_terminal() {
            return Err(Error::Conflict(format!("job {id} already finished")));
        }
        tracing::info!(job_id = %id, "Cancelling job");
        entry.cancel.cancel();
        Ok(())
    }

    /// Delete a terminal job and its artifact.
    pub fn remove(&self, id: JobId) -> mr_core::Result<()> {
        let job = {
            let mut table = self.jobs.write();
            let entry = table
                .entries
                .get(&id)
                .ok_or_else(|| Error::not_found("job", id))?;
            if !entry.job.state.is_terminal() {
                return Err(Error::Conflict(format!("job {id} is still active")));
            }
            table.finished.retain(|j| *j != id);
            table.entries.remove(&id).map(|e| e.job)
        };

        if let Some(job) = job {
            discard_artifact(&job);
        }
        Ok(())
    }

    /// All retained jobs, newest first.
    pub fn list(&self) -> Vec<JobView> {
        let table = self.jobs.read();
        let mut views: Vec<JobView> = table.entries.values().map(|e| e.job.view()).collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    pub fn stats(&self) -> JobStats {
        let table = self.jobs.read();
        let mut stats = JobStats {
            slots: self.pool.snapshot(),
            queued: 0,
            running: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            retained: table.entries.len(),
        };
        for entry in table.entries.values() {
            match entry.job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
                JobState::TimedOut => stats.timed_out += 1,
            }
        }
        stats
    }

    /// Stop admitting, let in-flight jobs finish within `grace`, then cancel
    /// whatever is left.
    ///
    /// Returns the number of jobs that had to be cancelled.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.pool.transition(Readiness::Draining);

        let in_flight = self.pool.snapshot();
        tracing::info!(
            running = in_flight.running,
            queued = in_flight.queued,
            grace = ?grace,
            "Draining jobs"
        );

        if tokio::time::timeout(grace, self.pool.wait_idle()).await.is_ok() {
            tracing::info!("All jobs finished");
            return 0;
        }

        let remaining = {
            let table = self.jobs.read();
            table
                .entries
                .values()
                .filter(|e| !e.job.state.is_terminal())
                .count()
        };
        tracing::warn!(remaining, "Drain grace period elapsed; cancelling jobs");
        self.shutdown.cancel();

        if tokio::time::timeout(CANCEL_GRACE, self.pool.wait_idle())
            .await
            .is_err()
        {
            tracing::error!("Cancelled jobs did not finish cleanup in time");
        }
        remaining
    }
}
