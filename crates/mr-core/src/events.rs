//! Job and readiness events, published to the SSE endpoint.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::readiness::Readiness;

/// Events kept for late subscribers.
const HISTORY_LEN: usize = 100;

/// What happened. Serialized with a `type` tag, e.g. `{"type":"job_queued",...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
    },
    JobSucceeded {
        job_id: JobId,
        artifact_bytes: u64,
    },
    JobFailed {
        job_id: JobId,
        kind: String,
        error: String,
    },
    JobTimedOut {
        job_id: JobId,
    },

    SubmissionRejected {
        reason: String,
    },
    ReadinessChanged {
        from: Readiness,
        to: Readiness,
    },
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Fan-out of [`Event`]s to any number of subscribers, plus a short history
/// for subscribers that connect late.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    /// Oldest first, at most [`HISTORY_LEN`] entries.
    history: Mutex<VecDeque<Event>>,
}

impl EventBus {
    /// `buffer` bounds how far a slow subscriber may lag before it starts
    /// missing events.
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Stamp `payload`, remember it, and send it to current subscribers.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        };

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    /// Up to `n` remembered events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.history.lock().iter().rev().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
