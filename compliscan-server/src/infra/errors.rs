use std::{fmt, time::Duration};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use compliscan_core::ScanError;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Rendered as a `Retry-After` header, in whole seconds.
    pub retry_after: Option<Duration>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn rate_limited(
        message: impl Into<String>,
        retry_after: Duration,
    ) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, message)
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after {
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Validation(message) => Self::bad_request(message),
            ScanError::NotFound(_) => Self::not_found(err.to_string()),
            ScanError::RateLimited { retry_after } => {
                Self::rate_limited(err.to_string(), retry_after)
            }
            ScanError::InvalidState { .. } | ScanError::LeaseLost { .. } => {
                Self::conflict(err.to_string())
            }
            other => {
                tracing::error!(error = %other, "scan operation failed");
                Self::internal("Internal server error")
            }
        }
    }
}

/// Success envelope for JSON endpoints.
///
/// Failures never use it; they are rendered by [`AppError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliscan_core::types::{JobId, ScanStatus};

    #[test]
    fn maps_scan_errors_to_status_codes() {
        let job_id = JobId::new();
        let cases = [
            (ScanError::validation("domain is required"), StatusCode::BAD_REQUEST),
            (ScanError::NotFound(job_id), StatusCode::NOT_FOUND),
            (
                ScanError::InvalidState {
                    job_id,
                    current: ScanStatus::Complete,
                    action: "cancel",
                },
                StatusCode::CONFLICT,
            ),
            (ScanError::LeaseLost { job_id }, StatusCode::CONFLICT),
            (ScanError::storage("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = AppError::from(ScanError::RateLimited {
            retry_after: Duration::from_millis(42_300),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("42")
        );
    }

    #[test]
    fn success_envelope_wraps_data() {
        let body = serde_json::to_value(ApiResponse::success(json!({"job_id": "abc"})))
            .unwrap();
        assert_eq!(body, json!({"status": "success", "data": {"job_id": "abc"}}));
    }

    #[test]
    fn storage_errors_do_not_leak_details() {
        let err = AppError::from(ScanError::storage("database error: password=hunter2"));
        assert_eq!(err.message, "Internal server error");
    }
}
