//! # mr-av
//!
//! External transcoder management and subprocess execution for mediarelay.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find the transcoder executable
//!   and verify it runs (the startup self-check).
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation, and process-group kill for running external processes.
//! - **Workspace management** ([`Workspace`]) -- per-job temporary directory
//!   removed on every exit path.
//! - **Subprocess runner** ([`Runner`]) -- turns an [`Operation`] into a
//!   discrete argument vector, runs it against a deadline, and moves the
//!   artifact out of the workspace.

pub mod command;
pub mod runner;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use runner::{Operation, RunOutput, Runner};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::Workspace;
