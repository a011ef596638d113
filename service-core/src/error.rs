use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Service-wide error type.
///
/// Every variant maps to a stable machine-readable `code` surfaced in the
/// response body, so callers can branch on outcomes without parsing messages.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    /// Supplied one-time code does not match the live code.
    #[error("Invalid verification code")]
    InvalidCode { remaining_attempts: u32 },

    /// Attempt counter reached its limit; the code has been invalidated.
    #[error("Maximum verification attempts exceeded")]
    AttemptsExceeded,

    /// The code or token exists but its validity window has passed.
    #[error("Expired")]
    Expired,

    /// Principal is locked out until the embedded timestamp.
    #[error("Account is temporarily locked")]
    AccountLocked { until: DateTime<Utc> },

    /// A signature nonce was presented twice inside the replay window.
    #[error("Signature already used")]
    ReplayDetected,

    /// Tamper-evident envelope failed cryptographic verification.
    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    /// A required upstream (cache, store, notifier) is unreachable and no
    /// fallback could absorb the failure.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidCode { .. } => "INVALID_CODE",
            AppError::AttemptsExceeded => "ATTEMPTS_EXCEEDED",
            AppError::Expired => "EXPIRED",
            AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AppError::ReplayDetected => "REPLAY_DETECTED",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::TooManyRequests(..) => "RATE_LIMITED",
            AppError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::CacheError(_) => "UPSTREAM_UNAVAILABLE",
            AppError::InvalidToken(_) => "UNAUTHORIZED",
            AppError::InternalError(_) => "INTERNAL_ERROR",
            AppError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidCode { .. }
            | AppError::AttemptsExceeded
            | AppError::Expired
            | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::AccountLocked { .. } => StatusCode::LOCKED,
            AppError::ReplayDetected => StatusCode::CONFLICT,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamUnavailable(_) | AppError::CacheError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DatabaseError(_)
            | AppError::InternalError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Uniform error body: `{ success, code, message }`.
#[derive(Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal failures are logged in full but never echoed to the caller.
        let (message, locked_until, retry_after) = match &self {
            AppError::DatabaseError(err)
            | AppError::InternalError(err)
            | AppError::ConfigError(err) => {
                tracing::error!(code, error = %err, "request failed");
                ("Internal server error".to_string(), None, None)
            }
            AppError::CacheError(err) => {
                tracing::error!(code, error = %err, "cache unavailable");
                ("Service temporarily unavailable".to_string(), None, None)
            }
            AppError::AccountLocked { until } => (self.to_string(), Some(*until), None),
            AppError::TooManyRequests(msg, retry) => (msg.clone(), None, *retry),
            other => (other.to_string(), None, None),
        };

        let mut res = (
            status,
            Json(ErrorBody {
                success: false,
                code,
                message,
                locked_until,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
