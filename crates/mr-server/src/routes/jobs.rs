//! Job route handlers.

use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use mr_av::Operation;
use mr_core::JobId;
use mr_jobs::{JobState, JobView, SubmitRequest};

use crate::context::AppContext;
use crate::error::AppError;

/// Upper bound for `GET /api/jobs/{id}/wait`.
const MAX_WAIT_SECS: u64 = 300;

/// Extra time a synchronous submission waits beyond the job's own deadline.
const SYNC_WAIT_SLACK: Duration = Duration::from_secs(10);

/// Request body for submitting a new job.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitJobRequest {
    /// Source media reference handed to the transcoder's `-i`.
    pub input: String,
    /// Transcoder arguments placed between input and output.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extension of the artifact, e.g. `mp4`.
    pub output_ext: String,
    /// Per-job deadline; clamped to the configured maximum.
    pub timeout_secs: Option<u64>,
    /// Block until the job is terminal and answer with its outcome.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WaitParams {
    /// Seconds to wait before returning the current state anyway.
    pub timeout: Option<u64>,
}

fn parse_id(id: &str) -> Result<JobId, AppError> {
    id.parse()
        .map_err(|_| mr_core::Error::Validation(format!("Invalid job ID: {id}")).into())
}

/// Status code for a job finished under `wait=true`.
fn outcome_status(view: &JobView) -> StatusCode {
    match view.state {
        JobState::Succeeded => StatusCode::OK,
        JobState::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        JobState::Queued | JobState::Running => StatusCode::ACCEPTED,
        JobState::Failed => match view.failure.as_ref().map(|f| f.kind.as_str()) {
            Some("spawn_failed") | Some("non_zero_exit") => StatusCode::BAD_GATEWAY,
            Some("cancelled") => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

/// Guess the MIME type of an artifact from its extension.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// GET /api/jobs
#[utoipa::path(
    get,
    path = "/api/jobs",
    responses(
        (status = 200, description = "Retained jobs, newest first", body = Vec<JobView>)
    )
)]
pub async fn list_jobs(State(ctx): State<AppContext>) -> Json<Vec<JobView>> {
    Json(ctx.coordinator.list())
}

/// POST /api/jobs
#[utoipa::path(
    post,
    path = "/api/jobs",
    request_body = SubmitJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = JobView),
        (status = 200, description = "Job succeeded (wait=true)", body = JobView),
        (status = 400, description = "Invalid request"),
        (status = 502, description = "Transcoder failed (wait=true)", body = JobView),
        (status = 503, description = "Overloaded or not ready"),
        (status = 504, description = "Job timed out (wait=true)", body = JobView)
    )
)]
pub async fn submit_job(
    State(ctx): State<AppContext>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) = payload?;
    let request = SubmitRequest {
        input: payload.input,
        operation: Operation {
            args: payload.args,
            output_ext: payload.output_ext,
        },
        timeout_secs: payload.timeout_secs,
    };

    if !payload.wait {
        let id = ctx.coordinator.submit(request)?;
        let view = ctx
            .coordinator
            .status(id)
            .ok_or_else(|| mr_core::Error::not_found("job", id))?;
        return Ok((StatusCode::ACCEPTED, Json(view)).into_response());
    }

    let limit = ctx.config.jobs.effective_timeout(payload.timeout_secs) + SYNC_WAIT_SLACK;
    let view = ctx.coordinator.submit_and_wait(request, limit).await?;
    Ok((outcome_status(&view), Json(view)).into_response())
}

/// GET /api/jobs/{id}
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job details", body = JobView),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, AppError> {
    let job_id = parse_id(&id)?;
    let view = ctx
        .coordinator
        .status(job_id)
        .ok_or_else(|| mr_core::Error::not_found("job", job_id))?;
    Ok(Json(view))
}

/// GET /api/jobs/{id}/wait
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/wait",
    params(("id" = String, Path, description = "Job ID"), WaitParams),
    responses(
        (status = 200, description = "Job state once terminal, or when the wait timed out", body = JobView),
        (status = 404, description = "Job not found")
    )
)]
pub async fn wait_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    params: Result<Query<WaitParams>, QueryRejection>,
) -> Result<Json<JobView>, AppError> {
    let job_id = parse_id(&id)?;
    let Query(params) = params?;
    let secs = params.timeout.unwrap_or(30).min(MAX_WAIT_SECS);
    let view = ctx
        .coordinator
        .wait(job_id, Some(Duration::from_secs(secs)))
        .await?;
    Ok(Json(view))
}

/// GET /api/jobs/{id}/artifact
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/artifact",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Artifact bytes"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job has not succeeded")
    )
)]
pub async fn download_artifact(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job_id = parse_id(&id)?;
    let (artifact, ext) = ctx.coordinator.artifact(job_id)?;

    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|_| mr_core::Error::not_found("artifact", job_id))?;
    let body = Body::from_stream(ReaderStream::with_capacity(file, 64 * 1024));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), content_type_for(&ext).to_string()),
            (header::CONTENT_LENGTH.as_str(), artifact.bytes.to_string()),
            (
                header::CONTENT_DISPOSITION.as_str(),
                format!("attachment; filename=\"{job_id}.{ext}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// DELETE /api/jobs/{id}
///
/// Cancels an active job (waiting briefly for it to stop) or removes a
/// finished one together with its artifact.
#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 204, description = "Job cancelled or removed"),
        (status = 404, description = "Job not found")
    )
)]
pub async fn delete_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let job_id = parse_id(&id)?;
    let view = ctx
        .coordinator
        .status(job_id)
        .ok_or_else(|| mr_core::Error::not_found("job", job_id))?;

    if view.state.is_terminal() {
        ctx.coordinator.remove(job_id)?;
    } else {
        match ctx.coordinator.cancel(job_id) {
            // Finished between the status read and the cancel.
            Err(mr_core::Error::Conflict(_)) => {}
            other => other?,
        }
        ctx.coordinator
            .wait(job_id, Some(Duration::from_secs(5)))
            .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mr_jobs::JobFailure;

    fn view(state: JobState, kind: Option<&str>) -> JobView {
        JobView {
            id: JobId::new().to_string(),
            input: "in.mkv".into(),
            args: vec![],
            output_ext: "mp4".into(),
            timeout_secs: 10,
            state,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            artifact_bytes: None,
            failure: kind.map(|k| JobFailure {
                kind: k.into(),
                detail: String::new(),
            }),
            stderr_tail: None,
        }
    }

    #[test]
    fn outcome_status_mapping() {
        assert_eq!(outcome_status(&view(JobState::Succeeded, None)), StatusCode::OK);
        assert_eq!(
            outcome_status(&view(JobState::TimedOut, Some("timed_out"))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            outcome_status(&view(JobState::Failed, Some("non_zero_exit"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            outcome_status(&view(JobState::Failed, Some("spawn_failed"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            outcome_status(&view(JobState::Failed, Some("internal_error"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("MP4"), "video/mp4");
        assert_eq!(content_type_for("flac"), "audio/flac");
        assert_eq!(content_type_for("xyz"), "application/octet-stream");
    }

    #[test]
    fn submit_request_defaults() {
        let req: SubmitJobRequest =
            serde_json::from_str(r#"{"input":"a.mkv","output_ext":"mp4"}"#).unwrap();
        assert!(req.args.is_empty());
        assert!(!req.wait);
        assert!(req.timeout_secs.is_none());
    }
}
