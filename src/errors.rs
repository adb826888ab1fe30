use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::response::ApiEnvelope;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("LLM error: {0}")]
    Llm(LlmError),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("LLM rate limited")]
    RateLimited,
    #[error("LLM features are disabled")]
    Disabled,
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Timeout")]
    Timeout,
}

impl LlmError {
    /// Whether the manual parser may stand in for this failure.
    pub fn permits_fallback(&self) -> bool {
        matches!(
            self,
            LlmError::Disabled
                | LlmError::RateLimited
                | LlmError::NetworkError(_)
                | LlmError::Timeout
                | LlmError::InvalidResponse(_)
        )
    }
}

/// Error taxonomy persisted on job records and returned by job endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    StoreUnavailable,
    UpstreamTimeout,
    UpstreamHttp,
    UpstreamParse,
    ParseSheet,
    ParseTotalFailure,
    UpstreamTotalFailure,
    Cancelled,
    LeaseLost,
    ManualOverride,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamHttp => "upstream_http",
            ErrorKind::UpstreamParse => "upstream_parse",
            ErrorKind::ParseSheet => "parse_sheet",
            ErrorKind::ParseTotalFailure => "parse_total_failure",
            ErrorKind::UpstreamTotalFailure => "upstream_total_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::LeaseLost => "lease_lost",
            ErrorKind::ManualOverride => "manual_override",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error carried across the scheduler boundary and stored on the job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancellation requested")
    }

    pub fn lease_lost() -> Self {
        Self::new(ErrorKind::LeaseLost, "lease expired before finalize")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

impl From<AppError> for JobError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::Validation(msg) => JobError::new(ErrorKind::Validation, msg),
            AppError::NotFound(msg) => JobError::new(ErrorKind::NotFound, msg),
            AppError::Conflict(msg) => JobError::new(ErrorKind::Conflict, msg),
            AppError::StoreUnavailable(msg) => JobError::new(ErrorKind::StoreUnavailable, msg),
            AppError::Db(e) => JobError::new(ErrorKind::StoreUnavailable, e.to_string()),
            AppError::Llm(e) => JobError::new(ErrorKind::UpstreamHttp, e.to_string()),
        }
    }
}

fn store_status(e: &sqlx::Error) -> StatusCode {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, ErrorKind) {
        match self {
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Validation),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::NotFound),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorKind::Conflict),
            AppError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::StoreUnavailable)
            }
            AppError::Db(e) => (store_status(e), ErrorKind::StoreUnavailable),
            AppError::Llm(LlmError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, ErrorKind::UpstreamTimeout)
            }
            AppError::Llm(_) => (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamHttp),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = self.status_and_kind();
        let message = match &self {
            // Internal store errors keep their detail out of responses
            AppError::Db(e) if store_status(e) == StatusCode::INTERNAL_SERVER_ERROR => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ApiEnvelope::<()>::error(JobError::new(kind, message));
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<LlmError> for AppError {
    fn from(value: LlmError) -> Self {
        AppError::Llm(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_snake_case() {
        let kinds = [
            (ErrorKind::ParseTotalFailure, "\"parse_total_failure\""),
            (ErrorKind::UpstreamTotalFailure, "\"upstream_total_failure\""),
            (ErrorKind::ManualOverride, "\"manual_override\""),
            (ErrorKind::LeaseLost, "\"lease_lost\""),
        ];
        for (kind, expected) in kinds {
            assert_eq!(serde_json::to_string(&kind).unwrap(), expected);
        }
    }

    #[test]
    fn job_error_round_trips() {
        let err = JobError::new(ErrorKind::ParseSheet, "no holdings table");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "parse_sheet");
        let back: JobError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn validation_maps_to_422() {
        let (status, _) = AppError::Validation("bad".into()).status_and_kind();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = AppError::Conflict("dup".into()).status_and_kind();
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, kind) = AppError::StoreUnavailable("down".into()).status_and_kind();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(kind, ErrorKind::StoreUnavailable);
    }

    #[test]
    fn llm_fallback_excludes_hard_api_errors() {
        assert!(LlmError::Disabled.permits_fallback());
        assert!(LlmError::Timeout.permits_fallback());
        assert!(LlmError::InvalidResponse("not json".into()).permits_fallback());
        assert!(!LlmError::ApiError("401".into()).permits_fallback());
    }
}
