//! Liveness and readiness.
//!
//! Liveness comes from a heartbeat task running on the serving runtime: if
//! the runtime stalls, the beat goes stale. Readiness combines the readiness
//! state held by the [`SlotPool`] with its saturation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mr_av::ToolRegistry;
use mr_core::Readiness;

use crate::admission::SlotPool;

/// A beat older than this many intervals means the process is not live.
const STALE_AFTER_INTERVALS: u32 = 3;

/// Body of the `/health` response.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthReport {
    pub live: bool,
    pub ready: bool,
    pub state: Readiness,
    pub saturated: bool,
}

/// Tracks liveness and derives readiness.
#[derive(Debug)]
pub struct HealthTracker {
    pool: Arc<SlotPool>,
    interval: Duration,
    stale_after: Duration,
    last_beat: Mutex<Instant>,
}

impl HealthTracker {
    pub fn new(pool: Arc<SlotPool>, interval: Duration) -> Arc<Self> {
        let interval = interval.max(Duration::from_millis(1));
        Arc::new(Self {
            pool,
            interval,
            stale_after: interval
                .checked_mul(STALE_AFTER_INTERVALS)
                .unwrap_or(Duration::MAX),
            last_beat: Mutex::new(Instant::now()),
        })
    }

    pub fn beat(&self) {
        *self.last_beat.lock() = Instant::now();
    }

    /// The serving runtime has beaten recently.
    pub fn liveness(&self) -> bool {
        self.last_beat.lock().elapsed() < self.stale_after
    }

    /// State is `Ready` and a new job would be admitted.
    pub fn readiness(&self) -> bool {
        self.pool.is_accepting()
    }

    pub fn state(&self) -> Readiness {
        self.pool.readiness()
    }

    pub fn report(&self) -> HealthReport {
        let snapshot = self.pool.snapshot();
        HealthReport {
            live: self.liveness(),
            ready: snapshot.readiness == Readiness::Ready && !snapshot.saturated,
            state: snapshot.readiness,
            saturated: snapshot.saturated,
        }
    }

    /// Apply the outcome of a dependency self-check.
    ///
    /// Success moves `Starting`/`Unhealthy` to `Ready`; failure moves
    /// `Starting`/`Ready` to `Unhealthy`. `Draining` is never left.
    pub fn record_self_check(&self, result: &mr_core::Result<String>) {
        match result {
            Ok(version) => {
                if self.pool.transition(Readiness::Ready) {
                    tracing::info!(version = %version, "Transcoder self-check passed");
                }
            }
            Err(e) => {
                if self.pool.transition(Readiness::Unhealthy) {
                    tracing::error!(error = %e, "Transcoder self-check failed");
                }
            }
        }
    }

    /// Beat every interval until `cancel` fires.
    pub fn spawn_heartbeat(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tracker.beat(),
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("Heartbeat stopped");
        })
    }

    /// Re-run the transcoder self-check every `every` until `cancel` fires.
    ///
    /// This is what lets an unhealthy service recover once the binary
    /// becomes usable, and lets a ready one notice that it went away.
    pub fn spawn_recheck(
        self: &Arc<Self>,
        tools: Arc<ToolRegistry>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; startup already ran a check.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                if tracker.state() == Readiness::Draining {
                    break;
                }
                let result = tools.self_check().await;
                tracker.record_self_check(&result);
            }
            tracing::debug!("Dependency re-check stopped");
        })
    }
}
