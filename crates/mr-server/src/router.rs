//! Axum router construction.
//!
//! Builds the full application router with all route groups, middleware
//! layers, and the OpenAPI docs.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::info::root,
        routes::info::status,
        routes::jobs::list_jobs,
        routes::jobs::submit_job,
        routes::jobs::get_job,
        routes::jobs::wait_job,
        routes::jobs::download_artifact,
        routes::jobs::delete_job,
        routes::admin::tools,
    ),
    components(schemas(
        routes::jobs::SubmitJobRequest,
        routes::info::InfoResponse,
        routes::info::StatusResponse,
        routes::info::TranscoderStatus,
        mr_jobs::JobView,
        mr_jobs::JobState,
        mr_jobs::JobFailure,
        mr_jobs::JobStats,
        mr_jobs::SlotSnapshot,
        mr_jobs::HealthReport,
        mr_core::Readiness,
        mr_av::ToolInfo,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Jobs
        .route(
            "/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::submit_job),
        )
        .route(
            "/jobs/{id}",
            get(routes::jobs::get_job).delete(routes::jobs::delete_job),
        )
        .route("/jobs/{id}/wait", get(routes::jobs::wait_job))
        .route(
            "/jobs/{id}/artifact",
            get(routes::jobs::download_artifact),
        )
        // Status and events
        .route("/status", get(routes::info::status))
        .route("/events", get(routes::events::events_handler))
        // Admin
        .route("/admin/tools", get(routes::admin::tools));

    Router::new()
        .route("/", get(routes::info::root))
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mr_core::config::Config;
    use tower::ServiceExt;

    fn context() -> AppContext {
        let mut config = Config::default();
        config.tools.transcoder = "nonexistent_tool_xyz_12345".into();
        AppContext::build(config).unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_is_503_while_starting() {
        let (status, body) = get_json(build_router(context()), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["live"], true);
        assert_eq!(body["ready"], false);
        assert_eq!(body["state"], "starting");
    }

    #[tokio::test]
    async fn health_is_200_once_ready() {
        let ctx = context();
        ctx.health.record_self_check(&Ok("test".into()));
        let (status, body) = get_json(build_router(ctx), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert_eq!(body["state"], "ready");
    }

    #[tokio::test]
    async fn unknown_job_is_404_with_code() {
        let path = format!("/api/jobs/{}", mr_core::JobId::new());
        let (status, body) = get_json(build_router(context()), &path).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn malformed_job_id_is_400() {
        let (status, body) = get_json(build_router(context()), "/api/jobs/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn submit_before_ready_is_503() {
        let request = Request::post("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"input":"a.mkv","output_ext":"mp4"}"#))
            .unwrap();
        let response = build_router(context()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn request_id_is_echoed() {
        let request = Request::get("/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = build_router(context()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn root_reports_identity() {
        let (status, body) = get_json(build_router(context()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "mediarelay");
        assert_eq!(body["port"], 8080);
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }
}
