//! mr-jobs: admission control, job lifecycle, and health tracking.
//!
//! - [`SlotPool`] bounds concurrent transcoder runs and makes the
//!   admission decision atomically with the readiness state.
//! - [`Coordinator`] owns every [`Job`] from acceptance to its terminal state
//!   and drives the [`mr_av::Runner`].
//! - [`HealthTracker`] answers liveness and readiness for `/health`.

pub mod admission;
pub mod coordinator;
pub mod health;
pub mod job;

pub use admission::{SlotPool, SlotSnapshot};
pub use coordinator::{Coordinator, JobStats, SubmitRequest};
pub use health::{HealthReport, HealthTracker};
pub use job::{Artifact, Job, JobFailure, JobState, JobView};
