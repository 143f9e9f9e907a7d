//! Error taxonomy for RentVault
//!
//! `DomainError` is what services return; `ApiError` maps it onto HTTP
//! status codes and the JSON error body served by the handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Business errors raised by the matching workflow, state machines,
/// payment ledger and reconciler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, correctable by the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller does not hold the role the operation requires
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Operation is invalid for the current state; caller should refresh
    #[error("Invalid state: {0}")]
    State(String),

    /// Idempotency-key collision
    #[error("Duplicate submission: {0}")]
    Conflict(String),

    /// Insufficient collateral or balance
    #[error("Insufficient capacity: {0}")]
    Capacity(String),

    /// Failure reaching the distributed ledger
    #[error("Ledger error: {message}")]
    ExternalLedger { message: String, retryable: bool },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        DomainError::Authorization(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        DomainError::State(msg.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        DomainError::NotFound(format!("{} {}", what, id))
    }

    /// A ledger timeout; always retryable
    pub fn ledger_timeout(operation: &str) -> Self {
        DomainError::ExternalLedger {
            message: format!("{} timed out", operation),
            retryable: true,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }

    /// Whether the same call may succeed if repeated later
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::ExternalLedger { retryable, .. } => *retryable,
            DomainError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                DomainError::Conflict(db_err.message().to_string())
            }
            other => DomainError::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        DomainError::ExternalLedger {
            retryable: err.is_timeout() || err.is_connect(),
            message: err.to_string(),
        }
    }
}

/// Result type alias using DomainError
pub type DomainResult<T> = Result<T, DomainError>;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::DuplicateSubmission(_) => "DUPLICATE_SUBMISSION",
            ApiError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidState(_) => StatusCode::CONFLICT,
            ApiError::DuplicateSubmission(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => ApiError::ValidationError(msg),
            DomainError::Authorization(msg) => ApiError::Forbidden(msg),
            DomainError::State(msg) => ApiError::InvalidState(msg),
            DomainError::Conflict(msg) => ApiError::DuplicateSubmission(msg),
            DomainError::Capacity(msg) => ApiError::UnprocessableEntity(msg),
            DomainError::ExternalLedger { message, retryable: true } => {
                ApiError::ServiceUnavailable(message)
            }
            DomainError::ExternalLedger { message, retryable: false } => {
                ApiError::ExternalServiceError(message)
            }
            DomainError::NotFound(msg) => ApiError::NotFound(msg),
            DomainError::Database(msg) => ApiError::DatabaseError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::InternalError(_)
            | ApiError::DatabaseError(_)
            | ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status_codes() {
        let cases = vec![
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::unauthorized("x"), StatusCode::FORBIDDEN),
            (DomainError::state("x"), StatusCode::CONFLICT),
            (DomainError::Conflict("x".into()), StatusCode::CONFLICT),
            (DomainError::Capacity("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::ledger_timeout("submit"), StatusCode::SERVICE_UNAVAILABLE),
            (
                DomainError::ExternalLedger {
                    message: "rejected".into(),
                    retryable: false,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (DomainError::not_found("Loan", 1), StatusCode::NOT_FOUND),
        ];

        for (domain, expected) in cases {
            assert_eq!(ApiError::from(domain).status_code(), expected);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::from(DomainError::Conflict("dup".into())).error_code(),
            "DUPLICATE_SUBMISSION"
        );
        assert_eq!(
            ApiError::from(DomainError::state("closed")).error_code(),
            "INVALID_STATE"
        );
        assert_eq!(
            ApiError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_timeouts_are_retryable() {
        assert!(DomainError::ledger_timeout("getAgreementState").is_retryable());
        assert!(!DomainError::unauthorized("lender only").is_retryable());
        assert!(!DomainError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DomainError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
