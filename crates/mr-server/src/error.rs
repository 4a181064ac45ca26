//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any [`mr_core::Error`]
//! converts with `?`. The body is always
//! `{"error": <detail>, "code": <machine kind>, "request_id": <id>}`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: mr_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: mr_core::Error) -> Self {
        Self {
            inner,
            request_id: request_id::current(),
        }
    }
}

impl From<mr_core::Error> for AppError {
    fn from(e: mr_core::Error) -> Self {
        Self::new(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(mr_core::Error::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(mr_core::Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(status = %status, error = %self.inner, "Server error in API handler");
        } else if status.is_server_error() {
            tracing::warn!(status = %status, error = %self.inner, "Request refused");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(mr_core::Error::not_found("job", "abc"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn overloaded_produces_503() {
        let err = AppError::new(mr_core::Error::Overloaded {
            running: 2,
            queued: 0,
            capacity: 2,
        });
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn timed_out_produces_504() {
        let err = AppError::new(mr_core::Error::TimedOut {
            tool: "ffmpeg".into(),
            after: Duration::from_secs(5),
        });
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn no_request_id_outside_a_request() {
        let err = AppError::new(mr_core::Error::Internal("oops".into()));
        assert!(err.request_id.is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        use axum::extract::FromRequest;

        let request = axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"input":"a.mkv"}"#))
            .unwrap();
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Body {
            input: String,
            output_ext: String,
        }
        let rejection = axum::Json::<Body>::from_request(request, &()).await.unwrap_err();

        let response = AppError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "validation_error");
        assert!(body["error"].as_str().unwrap().contains("output_ext"));
    }

    #[tokio::test]
    async fn body_carries_code() {
        let response = AppError::new(mr_core::Error::Validation("bad".into())).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "validation_error");
        assert!(body["error"].as_str().unwrap().contains("bad"));
    }
}
