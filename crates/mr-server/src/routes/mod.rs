//! Route handlers for the HTTP API.

pub mod admin;
pub mod events;
pub mod health;
pub mod info;
pub mod jobs;
