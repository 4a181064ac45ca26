//! Service info and status routes.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use mr_core::Readiness;
use mr_jobs::{HealthReport, JobStats};

use crate::context::AppContext;

/// Response for `GET /`.
#[derive(Serialize, utoipa::ToSchema)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub status: Readiness,
    pub port: u16,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Transcoder identity reported by the status route.
#[derive(Serialize, utoipa::ToSchema)]
pub struct TranscoderStatus {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

/// Response for `GET /api/status`.
#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub health: HealthReport,
    pub jobs: JobStats,
    pub transcoder: TranscoderStatus,
    pub port: u16,
    pub uptime_secs: i64,
    pub recent_events: usize,
}

/// GET /
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service identity", body = InfoResponse)
    )
)]
pub async fn root(State(ctx): State<AppContext>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: crate::SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: ctx.health.state(),
        port: ctx.config.server.port,
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// GET /api/status
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Readiness, slot usage and transcoder info", body = StatusResponse)
    )
)]
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let version = ctx.tools.version();
    Json(StatusResponse {
        health: ctx.health.report(),
        jobs: ctx.coordinator.stats(),
        transcoder: TranscoderStatus {
            name: ctx.tools.transcoder_name().to_string(),
            available: version.is_some() && ctx.tools.require_transcoder().is_ok(),
            version,
        },
        port: ctx.config.server.port,
        uptime_secs: (Utc::now() - ctx.started_at).num_seconds(),
        recent_events: ctx.event_bus.recent_events(usize::MAX).len(),
    })
}
