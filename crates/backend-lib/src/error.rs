// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type + wire/Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rideshare_common::{DriverId, RideId, RideStatus, Seq, ServerEvent};
use thiserror::Error;

/// Application error types with stable wire codes.
///
/// Every variant here is recoverable per-ride or per-driver; nothing is fatal
/// to the process.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid transition: cannot {action} a ride in state {from:?}")]
    InvalidTransition {
        from: RideStatus,
        action: &'static str,
    },

    #[error("ride {ride_id} was already accepted by another driver")]
    AlreadyAccepted { ride_id: RideId },

    #[error("no driver available for ride {ride_id}")]
    NoDriverAvailable { ride_id: RideId },

    #[error("stale location update: seq {seq} is not newer than {last}")]
    StaleUpdate { seq: Seq, last: Seq },

    #[error("ride {0} not found")]
    RideNotFound(RideId),

    #[error("driver {0} is not connected")]
    DriverNotConnected(DriverId),

    #[error("driver {0} already has an active ride")]
    DriverBusy(DriverId),

    #[error("driver {0} is not assigned to this ride")]
    NotAssignedDriver(DriverId),

    #[error("operation not permitted for this role: {0}")]
    RoleMismatch(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable code surfaced to clients in `error` events.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::AlreadyAccepted { .. } => "ALREADY_ACCEPTED",
            AppError::NoDriverAvailable { .. } => "NO_DRIVER_AVAILABLE",
            AppError::StaleUpdate { .. } => "STALE_UPDATE",
            AppError::RideNotFound(_) => "RIDE_NOT_FOUND",
            AppError::DriverNotConnected(_) => "DRIVER_NOT_CONNECTED",
            AppError::DriverBusy(_) => "DRIVER_BUSY",
            AppError::NotAssignedDriver(_) => "NOT_ASSIGNED_DRIVER",
            AppError::RoleMismatch(_) => "ROLE_MISMATCH",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Json(_) => "MALFORMED_MESSAGE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the (small) REST surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidTransition { .. }
            | AppError::AlreadyAccepted { .. }
            | AppError::DriverBusy(_) => StatusCode::CONFLICT,
            AppError::RideNotFound(_) | AppError::DriverNotConnected(_) => StatusCode::NOT_FOUND,
            AppError::NotAssignedDriver(_) | AppError::RoleMismatch(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) | AppError::Json(_) | AppError::StaleUpdate { .. } => {
                StatusCode::BAD_REQUEST
            },
            AppError::NoDriverAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render this error as a wire event for the initiating session.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_codes_are_stable() {
        let err = AppError::AlreadyAccepted {
            ride_id: Uuid::nil(),
        };
        assert_eq!(err.error_code(), "ALREADY_ACCEPTED");

        let err = AppError::InvalidTransition {
            from: RideStatus::Completed,
            action: "cancel",
        };
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("Completed"));
    }

    #[test]
    fn test_error_to_event() {
        let err = AppError::RideNotFound(Uuid::nil());
        match err.to_event() {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, "RIDE_NOT_FOUND");
                assert!(message.contains("not found"));
            },
            other => panic!("Expected Error event, got {other:?}"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::AlreadyAccepted {
                ride_id: Uuid::nil()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::RideNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response() {
        let response = AppError::RideNotFound(Uuid::nil()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
