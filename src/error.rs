use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

pub type WrapResult<T> = Result<T, WrapError>;

/// Failures that reach a caller of the pipeline.
///
/// A degraded histogram has no variant; it is logged and folded into an
/// unranked percentile.
#[derive(Debug, Error)]
pub enum WrapError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("profile not found: `{username}`")]
    ProfileNotFound { username: String },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WrapError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputInvalid(_) => "InputInvalid",
            Self::ProfileNotFound { .. } => "ProfileNotFound",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::InvalidConfig(_) => "InvalidConfig",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InputInvalid(_) => StatusCode::BAD_REQUEST,
            Self::ProfileNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error paired with the request id it was raised under, so the body can echo it.
#[derive(Debug)]
pub struct RequestError {
    pub request_id: String,
    pub error: WrapError,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = ApiResponse {
            status: "error".to_string(),
            message: self.error.to_string(),
            data: Some(serde_json::json!({
                "code": self.error.code(),
                "request_id": self.request_id,
            })),
        };
        (status, Json(body)).into_response()
    }
}
