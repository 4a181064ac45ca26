//! Health endpoint for external pollers.
//!
//! Reads the health tracker only; never touches job execution.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use mr_jobs::HealthReport;

use crate::context::AppContext;

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Live and ready for work", body = HealthReport),
        (status = 503, description = "Not ready (starting, draining, unhealthy, or at capacity)", body = HealthReport)
    )
)]
pub async fn health_check(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthReport>) {
    let report = ctx.health.report();
    let status = if report.live && report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
