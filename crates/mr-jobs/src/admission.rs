//! Slot pool and admission control.
//!
//! Admission is a single decision taken under one mutex: the readiness state,
//! the number of admitted jobs (running + queued) and the spawn-failure
//! streak live together in [`AdmissionState`]. A job that passes admission
//! holds a [`Ticket`] until it finishes; while running it additionally holds
//! a [`Slot`], a permit from a FIFO semaphore sized to the pool capacity.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use mr_core::events::{EventBus, EventPayload};
use mr_core::{Error, Readiness};

#[derive(Debug)]
struct AdmissionState {
    readiness: Readiness,
    admitted: usize,
    running: usize,
    spawn_failure_streak: u32,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SlotSnapshot {
    pub readiness: Readiness,
    pub capacity: usize,
    pub max_queue: usize,
    /// Jobs holding a slot.
    pub running: usize,
    /// Jobs admitted but still waiting for a slot.
    pub queued: usize,
    /// No further submission would be admitted.
    pub saturated: bool,
}

/// Fixed-capacity execution slots plus the readiness state they are gated on.
#[derive(Debug)]
pub struct SlotPool {
    capacity: usize,
    max_queue: usize,
    unhealthy_after: u32,
    semaphore: Arc<Semaphore>,
    state: Mutex<AdmissionState>,
    idle: Notify,
    events: Arc<EventBus>,
}

impl SlotPool {
    /// Create a pool with `capacity` slots and room for `max_queue` waiting
    /// jobs. `unhealthy_after` consecutive spawn failures mark the service
    /// unhealthy (0 disables).
    pub fn new(
        capacity: usize,
        max_queue: usize,
        unhealthy_after: u32,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            capacity,
            max_queue,
            unhealthy_after,
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Mutex::new(AdmissionState {
                readiness: Readiness::Starting,
                admitted: 0,
                running: 0,
                spawn_failure_streak: 0,
            }),
            idle: Notify::new(),
            events,
        })
    }

    fn limit(&self) -> usize {
        self.capacity + self.max_queue
    }

    /// Admit one job or reject it. The check and the increment happen under
    /// the same lock, so concurrent callers can never over-admit.
    pub fn try_admit(self: &Arc<Self>) -> mr_core::Result<Ticket> {
        let mut state = self.state.lock();

        if state.readiness != Readiness::Ready {
            return Err(Error::NotReady(state.readiness.to_string()));
        }
        if state.admitted >= self.limit() {
            return Err(Error::Overloaded {
                running: state.running,
                queued: state.admitted - state.running,
                capacity: self.capacity,
            });
        }

        state.admitted += 1;
        Ok(Ticket {
            pool: Arc::clone(self),
        })
    }

    pub fn readiness(&self) -> Readiness {
        self.state.lock().readiness
    }

    /// Whether the process would admit a job right now.
    pub fn is_accepting(&self) -> bool {
        let state = self.state.lock();
        state.readiness == Readiness::Ready && state.admitted < self.limit()
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.state.lock();
        SlotSnapshot {
            readiness: state.readiness,
            capacity: self.capacity,
            max_queue: self.max_queue,
            running: state.running,
            queued: state.admitted - state.running,
            saturated: state.admitted >= self.limit(),
        }
    }

    /// Move to `next` if the readiness state machine allows it.
    ///
    /// Returns `true` if the state changed.
    pub fn transition(&self, next: Readiness) -> bool {
        let from = {
            let mut state = self.state.lock();
            let from = state.readiness;
            if !from.can_become(next) {
                return false;
            }
            state.readiness = next;
            if next == Readiness::Ready {
                state.spawn_failure_streak = 0;
            }
            from
        };

        tracing::info!(from = %from, to = %next, "Readiness changed");
        self.events
            .broadcast(EventPayload::ReadinessChanged { from, to: next });
        true
    }

    /// Record whether a job managed to start its subprocess. Enough
    /// consecutive spawn failures move a ready service to unhealthy.
    pub fn record_spawn(&self, spawned: bool) {
        let trip = {
            let mut state = self.state.lock();
            if spawned {
                state.spawn_failure_streak = 0;
                false
            } else {
                state.spawn_failure_streak += 1;
                self.unhealthy_after > 0
                    && state.spawn_failure_streak >= self.unhealthy_after
                    && state.readiness == Readiness::Ready
            }
        };

        if trip {
            tracing::error!(
                failures = self.unhealthy_after,
                "Transcoder failed to start repeatedly; marking unhealthy"
            );
            self.transition(Readiness::Unhealthy);
        }
    }

    /// Resolve once no job is admitted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.state.lock().admitted == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.admitted = state.admitted.saturating_sub(1);
            state.admitted == 0
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Proof of admission. Dropping it releases the job's admission count.
#[derive(Debug)]
pub struct Ticket {
    pool: Arc<SlotPool>,
}

impl Ticket {
    /// Wait (in FIFO order) for an execution slot.
    pub async fn acquire(&self) -> mr_core::Result<Slot> {
        let permit = Arc::clone(&self.pool.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("slot pool closed".into()))?;
        self.pool.state.lock().running += 1;
        Ok(Slot {
            pool: Arc::clone(&self.pool),
            _permit: permit,
        })
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// An occupied execution slot.
#[derive(Debug)]
pub struct Slot {
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.running = state.running.saturating_sub(1);
    }
}
