//! API error type and HTTP mapping.
//!
//! Clients always receive a JSON `{ "detail": ... }` body. Status codes:
//! 400 invalid input / conflict, 401 unauthenticated, 403 forbidden,
//! 404 not found, 500 internal. Internal details are logged, never sent.

use agentflow_workflow::error::EngineError;
use agentflow_workflow::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// API-facing error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Schema or validation failure.
    InvalidInput(String),
    /// No or invalid credentials.
    Unauthorized(String),
    /// Authenticated but not allowed.
    Forbidden(String),
    /// Unknown id.
    NotFound(String),
    /// Status transition would violate monotonicity.
    Conflict(String),
    /// Anything else; details are logged server-side only.
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(detail) => write!(f, "invalid input: {detail}"),
            Self::Unauthorized(detail) => write!(f, "unauthorized: {detail}"),
            Self::Forbidden(detail) => write!(f, "forbidden: {detail}"),
            Self::NotFound(detail) => write!(f, "not found: {detail}"),
            Self::Conflict(detail) => write!(f, "conflict: {detail}"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::InvalidInput(detail)
            | Self::Unauthorized(detail)
            | Self::Forbidden(detail)
            | Self::NotFound(detail)
            | Self::Conflict(detail) => detail.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(detail, "internal api error");
        }
        (self.status(), Json(json!({"detail": self.detail()}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id} not found")),
            StoreError::Conflict { message } => Self::Conflict(message),
            StoreError::Backend { message } => Self::Internal(message),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::InvalidWorkflow { message } => Self::InvalidInput(message),
            EngineError::ExecutionNotFound { execution_id } => {
                Self::NotFound(format!("execution {execution_id} not found"))
            }
            EngineError::NodeFailed { node_id, error } => {
                Self::Internal(format!("node {node_id} failed: {error}"))
            }
            EngineError::Cancelled => Self::Conflict("execution cancelled".to_string()),
            EngineError::Store { message } | EngineError::Internal { message } => {
                Self::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_contract() {
        assert_eq!(ApiError::InvalidInput(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized(String::new()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound(String::new()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let error = ApiError::Internal("database password rejected".to_string());
        assert_eq!(error.detail(), "Internal server error");
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let error: ApiError = StoreError::NotFound {
            entity: "execution",
            id: "exec_x".to_string(),
        }
        .into();
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
