use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{dao::reference::ReferenceError, state::error::SessionError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A session action was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The reference data collaborator failed.
    #[error("reference data unavailable")]
    Reference(#[source] ReferenceError),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ReferenceError> for ServiceError {
    fn from(err: ReferenceError) -> Self {
        ServiceError::Reference(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest {
            kind: "invalid_input",
            message: format!("validation failed: {}", err),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("{message}")]
    BadRequest { kind: &'static str, message: String },
    /// The request carries no usable caller identity.
    #[error("{message}")]
    Unauthorized { kind: &'static str, message: String },
    /// The caller is not allowed to perform this action.
    #[error("{message}")]
    Forbidden { kind: &'static str, message: String },
    /// Requested resource not found.
    #[error("{message}")]
    NotFound { kind: &'static str, message: String },
    /// The session reached its deadline.
    #[error("{message}")]
    Gone { kind: &'static str, message: String },
    /// Conflict with current state.
    #[error("{message}")]
    Conflict { kind: &'static str, message: String },
    /// Well-formed request the rules refuse.
    #[error("{message}")]
    Unprocessable { kind: &'static str, message: String },
    /// Service unavailable or busy.
    #[error("{message}")]
    ServiceUnavailable { kind: &'static str, message: String },
}

impl AppError {
    /// Missing or malformed caller identity.
    pub fn missing_identity() -> Self {
        AppError::Unauthorized {
            kind: "missing_identity",
            message: "the x-player-id header is required".into(),
        }
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest { kind, .. } => (StatusCode::BAD_REQUEST, *kind),
            AppError::Unauthorized { kind, .. } => (StatusCode::UNAUTHORIZED, *kind),
            AppError::Forbidden { kind, .. } => (StatusCode::FORBIDDEN, *kind),
            AppError::NotFound { kind, .. } => (StatusCode::NOT_FOUND, *kind),
            AppError::Gone { kind, .. } => (StatusCode::GONE, *kind),
            AppError::Conflict { kind, .. } => (StatusCode::CONFLICT, *kind),
            AppError::Unprocessable { kind, .. } => (StatusCode::UNPROCESSABLE_ENTITY, *kind),
            AppError::ServiceUnavailable { kind, .. } => (StatusCode::SERVICE_UNAVAILABLE, *kind),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::InvalidConfig(_) => AppError::BadRequest {
                kind: "invalid_config",
                message,
            },
            SessionError::InvalidCoordinate(_) => AppError::BadRequest {
                kind: "invalid_coordinate",
                message,
            },
            SessionError::NotHost(_) => AppError::Forbidden {
                kind: "not_host",
                message,
            },
            SessionError::SessionNotFound(_) => AppError::NotFound {
                kind: "session_not_found",
                message,
            },
            SessionError::SessionClosed(_) => AppError::NotFound {
                kind: "session_closed",
                message,
            },
            SessionError::UnknownPlayer(_) => AppError::NotFound {
                kind: "unknown_player",
                message,
            },
            SessionError::SessionExpired(_) => AppError::Gone {
                kind: "session_expired",
                message,
            },
            SessionError::SessionFull { .. } => AppError::Conflict {
                kind: "session_full",
                message,
            },
            SessionError::DuplicateJoin(_) => AppError::Conflict {
                kind: "duplicate_join",
                message,
            },
            SessionError::NotReadyToStart(_) => AppError::Conflict {
                kind: "not_ready_to_start",
                message,
            },
            SessionError::StaleSubmission { .. } => AppError::Conflict {
                kind: "stale_submission",
                message,
            },
            SessionError::InvalidPhase { .. } => AppError::Conflict {
                kind: "invalid_phase",
                message,
            },
            SessionError::OutOfRange { .. } => AppError::Unprocessable {
                kind: "out_of_range",
                message,
            },
            SessionError::Busy(_) => AppError::ServiceUnavailable {
                kind: "busy",
                message,
            },
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Session(source) => source.into(),
            ServiceError::Reference(source) => AppError::ServiceUnavailable {
                kind: "reference_unavailable",
                message: source.to_string(),
            },
            ServiceError::InvalidInput(message) => AppError::BadRequest {
                kind: "invalid_input",
                message,
            },
            ServiceError::NotFound(message) => AppError::NotFound {
                kind: "not_found",
                message,
            },
        }
    }
}

/// JSON body returned with every error status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable error kind, e.g. `session_full`.
    #[schema(value_type = String)]
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = self.parts();

        let payload = Json(ErrorBody {
            kind,
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::{geofence::Coordinate, state_machine::SessionPhase};

    fn status_of(err: SessionError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn session_errors_map_to_http_statuses() {
        let id = Uuid::nil();
        let cases = [
            (SessionError::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
            (
                Coordinate::new(100.0, 0.0).validate().unwrap_err().into(),
                StatusCode::BAD_REQUEST,
            ),
            (SessionError::NotHost("p".into()), StatusCode::FORBIDDEN),
            (SessionError::SessionNotFound(id), StatusCode::NOT_FOUND),
            (SessionError::SessionClosed(id), StatusCode::NOT_FOUND),
            (SessionError::UnknownPlayer("p".into()), StatusCode::NOT_FOUND),
            (SessionError::SessionExpired(id), StatusCode::GONE),
            (SessionError::SessionFull { max_players: 4 }, StatusCode::CONFLICT),
            (SessionError::DuplicateJoin("p".into()), StatusCode::CONFLICT),
            (SessionError::NotReadyToStart("x".into()), StatusCode::CONFLICT),
            (
                SessionError::StaleSubmission {
                    submitted: "q1".into(),
                    current: Some("q2".into()),
                },
                StatusCode::CONFLICT,
            ),
            (
                SessionError::InvalidPhase {
                    operation: "join",
                    phase: SessionPhase::Racing,
                },
                StatusCode::CONFLICT,
            ),
            (
                SessionError::OutOfRange {
                    distance_km: 2.0,
                    radius_km: 1.0,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SessionError::Busy(id), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            let label = format!("{err:?}");
            assert_eq!(status_of(err), expected, "{label}");
        }
    }

    #[test]
    fn reference_failures_are_unavailable() {
        let err = ServiceError::Reference(ReferenceError::Unavailable("down".into()));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let err = AppError::missing_identity();
        assert_eq!(err.parts(), (StatusCode::UNAUTHORIZED, "missing_identity"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn error_kind_is_stable() {
        let err = AppError::from(SessionError::SessionFull { max_players: 4 });
        assert_eq!(err.parts().1, "session_full");
        assert_eq!(err.to_string(), "session is full (4 players)");
    }
}
