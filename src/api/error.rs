//! API error type and its envelope rendering.

use super::ApiResponse;
use crate::error::SyncError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Status used when the caller went away before the run finished.
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Envelope code; also used as the HTTP status.
    pub fn code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
            Self::Sync(err) => match err {
                SyncError::Validation(_) => 400,
                SyncError::NotFound { .. } | SyncError::NoAdapter(_) => 404,
                SyncError::Duplicate { .. }
                | SyncError::SourceDisabled(_)
                | SyncError::RunInProgress(_) => 409,
                SyncError::Credential(_) => 503,
                SyncError::Upstream { .. } => 502,
                SyncError::Cancelled => CLIENT_CLOSED_REQUEST,
                SyncError::Storage(_) | SyncError::Json(_) => 500,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = match &self {
            Self::Sync(SyncError::Storage(err)) => {
                tracing::error!(error = %err, "database error");
                "A database error occurred".to_string()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiResponse<()> = ApiResponse {
            code: i32::from(code),
            message,
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(ApiError::from(SyncError::validation("x")).code(), 400);
        assert_eq!(ApiError::from(SyncError::not_found("keyword", 1)).code(), 404);
        assert_eq!(ApiError::from(SyncError::RunInProgress(1)).code(), 409);
        assert_eq!(ApiError::from(SyncError::SourceDisabled("yt".into())).code(), 409);
        assert_eq!(ApiError::from(SyncError::Credential("bilibili".into())).code(), 503);
        assert_eq!(ApiError::from(SyncError::Cancelled).code(), 499);
        let upstream = SyncError::Upstream {
            source: UpstreamError::rate_limited("slow down"),
            attempts: 3,
        };
        assert_eq!(ApiError::from(upstream).code(), 502);
    }
}
