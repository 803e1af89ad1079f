use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::session::SessionStatus;

/// Domain errors raised by the room coordinator.
///
/// Validation, state and authorization errors are reported to the originating
/// connection only; they never touch shared room state.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("{0}")]
    State(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("storage temporarily unavailable: {0}")]
    TransientStorage(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl RoomError {
    /// Stable machine-readable code, used in `error` events and JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RoomError::NotFound(_) => "not_found",
            RoomError::Validation(_) => "validation_error",
            RoomError::InvalidTransition { .. } => "invalid_transition",
            RoomError::State(_) => "state_error",
            RoomError::Authorization(_) => "authorization_error",
            RoomError::TransientStorage(_) => "transient_storage_error",
            RoomError::Storage(_) => "storage_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RoomError::NotFound(_) => StatusCode::NOT_FOUND,
            RoomError::Validation(_) => StatusCode::BAD_REQUEST,
            RoomError::InvalidTransition { .. } | RoomError::State(_) => StatusCode::CONFLICT,
            RoomError::Authorization(_) => StatusCode::FORBIDDEN,
            RoomError::TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,
            RoomError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            RoomError::Storage(msg) => {
                tracing::error!("Storage failure: {}", msg);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Errors surfaced by an [`EntityStore`](crate::services::entity_store::EntityStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => RoomError::NotFound(what),
            StoreError::Transient(msg) => RoomError::TransientStorage(msg),
            StoreError::Permanent(msg) => RoomError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_room_taxonomy() {
        let err: RoomError = StoreError::Transient("timeout".into()).into();
        assert_eq!(err.kind(), "transient_storage_error");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: RoomError = StoreError::NotFound("quiz q1".into()).into();
        assert_eq!(err.to_string(), "quiz q1 not found");
    }

    #[test]
    fn invalid_transition_is_a_conflict() {
        let err = RoomError::InvalidTransition {
            from: SessionStatus::Completed,
            to: SessionStatus::InProgress,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            err.to_string(),
            "invalid transition from completed to in_progress"
        );
    }
}
