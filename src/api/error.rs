use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::GenieError;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl GenieError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GenieError::Precondition(_) | GenieError::NoClusterFound(_) => {
                StatusCode::PRECONDITION_FAILED
            }
            GenieError::JobNotFound(_) => StatusCode::NOT_FOUND,
            GenieError::JobAlreadyExists(_) => StatusCode::CONFLICT,
            GenieError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GenieError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            GenieError::Precondition("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            GenieError::NoClusterFound("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(GenieError::JobNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(GenieError::JobAlreadyExists("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(GenieError::AtCapacity.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        // Configuration errors are the server's fault
        assert_eq!(
            GenieError::UnknownClusterType("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GenieError::InvalidStrategyBinding("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GenieError::EmptyCandidateSet.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
