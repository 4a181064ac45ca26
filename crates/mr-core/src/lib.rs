//! mr-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other mr-* crates,
//! providing the job identifier, a unified error type with stable machine
//! codes, the readiness state, the service configuration, and a broadcast
//! event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod readiness;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::JobId;
pub use readiness::Readiness;
