use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    services::{identity::PoolExhausted, mini_events::effects::EffectError},
    state::{AbortError, ApplyError, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The requester is a party member but not its host.
    #[error("only the host can {0}")]
    NotHost(String),
    /// Requester does not belong to the party.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Some players still owe songs.
    #[error("submissions incomplete: {} player(s) still submitting", .pending_players.len())]
    SubmissionsIncomplete {
        /// Players that have not submitted every song yet.
        pending_players: Vec<Uuid>,
    },
    /// The reconnection window has elapsed.
    #[error("session expired")]
    SessionExpired,
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<EffectError> for ServiceError {
    fn from(err: EffectError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<PoolExhausted> for ServiceError {
    fn from(err: PoolExhausted) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

/// HTTP face of a [`ServiceError`]: a status, a stable machine-readable code and a message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Rejected request body or parameters.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::bad_request(format!("validation failed: {err}"))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            ServiceError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            ServiceError::Degraded => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
            ServiceError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "timeout"),
            ServiceError::NotHost(_) => (StatusCode::FORBIDDEN, "not_host"),
            ServiceError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ServiceError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ServiceError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            ServiceError::SubmissionsIncomplete { .. } => {
                (StatusCode::CONFLICT, "submissions_incomplete")
            }
            ServiceError::SessionExpired => (StatusCode::GONE, "session_expired"),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        AppError::new(status, code, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn error_codes_are_stable() {
        let err = AppError::from(ServiceError::SessionExpired);
        assert_eq!(err.code, "session_expired");
        assert_eq!(err.status(), StatusCode::GONE);
        assert_eq!(err.to_string(), "session expired");
    }

    #[test]
    fn service_errors_map_to_status_codes() {
        assert_eq!(status_of(ServiceError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::NotHost("start".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ServiceError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::InvalidState("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ServiceError::SubmissionsIncomplete {
                pending_players: vec![Uuid::nil()]
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::SessionExpired), StatusCode::GONE);
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_of(ServiceError::Timeout), StatusCode::SERVICE_UNAVAILABLE);
    }
}
