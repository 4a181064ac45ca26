//! Unified error type for mediarelay.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`] and
//! a stable machine-readable kind via [`Error::code`].

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in mediarelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The request conflicts with the current state of a resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Every execution slot (and queue position) is taken.
    #[error("Overloaded: {running} running, {queued} queued (capacity {capacity})")]
    Overloaded {
        /// Jobs currently holding a slot.
        running: usize,
        /// Jobs admitted but waiting for a slot.
        queued: usize,
        /// Slot pool capacity.
        capacity: usize,
    },

    /// The service is not accepting new work (starting, draining, unhealthy).
    #[error("Not ready: service is {0}")]
    NotReady(String),

    /// The external tool could not be started.
    #[error("Spawn failed [{tool}]: {message}")]
    SpawnFailed {
        /// Name of the tool that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The external tool ran and reported failure.
    #[error("Tool error [{tool}]: exited with {status}: {detail}")]
    NonZeroExit {
        /// Name of the tool.
        tool: String,
        /// Exit status as reported by the OS (code or signal).
        status: String,
        /// Tail of the tool's diagnostic output.
        detail: String,
    },

    /// The external tool exceeded its deadline and was killed.
    #[error("Timed out [{tool}] after {after:?}")]
    TimedOut {
        /// Name of the tool.
        tool: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The operation was cancelled before it finished.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A required external dependency is unusable.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Overloaded { .. } => 503,
            Error::NotReady(_) => 503,
            Error::SpawnFailed { .. } => 502,
            Error::NonZeroExit { .. } => 502,
            Error::TimedOut { .. } => 504,
            Error::Cancelled(_) => 409,
            Error::Dependency(_) => 503,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable kind, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::Overloaded { .. } => "overloaded",
            Error::NotReady(_) => "not_ready",
            Error::SpawnFailed { .. } => "spawn_failed",
            Error::NonZeroExit { .. } => "non_zero_exit",
            Error::TimedOut { .. } => "timed_out",
            Error::Cancelled(_) => "cancelled",
            Error::Dependency(_) => "dependency_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::SpawnFailed`].
    pub fn spawn_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SpawnFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
