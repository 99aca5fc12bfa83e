use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    application::repos::RepoError, domain::error::DomainError, infra::error::InfraError,
    limiter::Decision,
};

/// Why a write was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("too many comments are being posted, please try again later")]
    GlobalFlood,
    #[error("you can only post a comment once every {cooldown_minutes} minutes")]
    Cooldown {
        retry_after_secs: u64,
        cooldown_minutes: u64,
    },
}

impl Rejection {
    /// Converts a limiter decision; `None` when the write was allowed.
    pub fn from_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Allowed => None,
            Decision::GlobalFloodRejected => Some(Self::GlobalFlood),
            Decision::CooldownRejected {
                retry_after_secs,
                cooldown_minutes,
            } => Some(Self::Cooldown {
                retry_after_secs,
                cooldown_minutes,
            }),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::GlobalFlood => None,
            Self::Cooldown {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("content repository failed: {0}")]
    Repository(RepoError),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    RateLimited(Rejection),
    #[error("{0}")]
    Disabled(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Repository,
    NotFound,
    Validation,
    RateLimited,
    Disabled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Repository => "repository_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Disabled => "disabled",
            ErrorKind::Internal => "internal_error",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Repository => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Disabled => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn disabled(message: impl Into<String>) -> Self {
        Self::Disabled(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Repository(_) => ErrorKind::Repository,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::RateLimited(_) => ErrorKind::RateLimited,
            AppError::Disabled(_) => ErrorKind::Disabled,
            AppError::Unexpected(_) => ErrorKind::Internal,
        }
    }

    fn presentation_message(&self) -> String {
        match self {
            AppError::Repository(_) => "Content temporarily unavailable".to_string(),
            AppError::Unexpected(_) => "Unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound => AppError::not_found("resource"),
            RepoError::InvalidInput { message } => AppError::Validation(message),
            other => AppError::Repository(other),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::NotFound { entity } => AppError::not_found(entity),
            DomainError::Validation { message } => AppError::Validation(message),
        }
    }
}

impl From<InfraError> for AppError {
    fn from(error: InfraError) -> Self {
        AppError::unexpected(error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status();

        if status.is_server_error() {
            error!(code = kind.as_str(), error = %self, "request failed");
        } else {
            warn!(code = kind.as_str(), error = %self, "request rejected");
        }

        let body = ErrorBody {
            code: kind.as_str(),
            message: self.presentation_message(),
        };
        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited(rejection) = &self
            && let Some(secs) = rejection.retry_after_secs()
        {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (
                AppError::Repository(RepoError::from_persistence("down")),
                "repository_error",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::not_found("post"), "not_found", StatusCode::NOT_FOUND),
            (
                AppError::validation("missing"),
                "validation_error",
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::RateLimited(Rejection::GlobalFlood),
                "rate_limited",
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AppError::disabled("off"),
                "disabled",
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::unexpected("boom"),
                "internal_error",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, code, status) in cases {
            assert_eq!(error.kind().as_str(), code);
            assert_eq!(error.kind().status(), status);
        }
    }

    #[test]
    fn repo_not_found_becomes_not_found() {
        let error = AppError::from(RepoError::NotFound);
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn repo_invalid_input_is_a_validation_error() {
        let error = AppError::from(RepoError::InvalidInput {
            message: "post id must be positive".to_string(),
        });
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.kind().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cooldown_response_carries_retry_after() {
        let response = AppError::RateLimited(Rejection::Cooldown {
            retry_after_secs: 120,
            cooldown_minutes: 5,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).map(HeaderValue::as_bytes),
            Some(&b"120"[..])
        );
    }

    #[test]
    fn flood_response_has_no_identity_detail() {
        let response = AppError::RateLimited(Rejection::GlobalFlood).into_response();
        assert!(response.headers().get(RETRY_AFTER).is_none());
        assert_eq!(
            Rejection::GlobalFlood.to_string(),
            "too many comments are being posted, please try again later"
        );
    }

    #[test]
    fn cooldown_message_names_minutes() {
        let rejection = Rejection::Cooldown {
            retry_after_secs: 60,
            cooldown_minutes: 5,
        };
        assert_eq!(
            rejection.to_string(),
            "you can only post a comment once every 5 minutes"
        );
    }
}
