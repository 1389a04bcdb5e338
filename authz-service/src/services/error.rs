use service_core::error::AppError;
use thiserror::Error;

use crate::models::DeptId;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Cannot move department {dept_id} under {new_parent_id}: would create a cycle")]
    Cycle {
        dept_id: DeptId,
        new_parent_id: DeptId,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(anyhow::Error),

    #[error("Repository error: {0}")]
    Repository(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        AuthError::NotFound { entity, id }
    }

    /// Only cache outages are worth retrying; everything else is a decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::CacheUnavailable(_))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            AuthError::Cycle { .. } | AuthError::Conflict(_) => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            AuthError::Expired => AppError::Unauthorized(anyhow::anyhow!("Token expired")),
            AuthError::Invalid(_) => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            AuthError::CacheUnavailable(_) => AppError::ServiceUnavailable,
            AuthError::Repository(e) => AppError::InternalError(e),
            AuthError::Config(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            AuthError::Internal(e) => AppError::InternalError(anyhow::anyhow!(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::http::StatusCode;

    #[test]
    fn test_maps_onto_app_error_statuses() {
        let cases = [
            (AuthError::not_found("department", 9), StatusCode::NOT_FOUND),
            (
                AuthError::Cycle {
                    dept_id: 2,
                    new_parent_id: 3,
                },
                StatusCode::CONFLICT,
            ),
            (AuthError::Expired, StatusCode::UNAUTHORIZED),
            (AuthError::Invalid("bad signature".into()), StatusCode::UNAUTHORIZED),
            (
                AuthError::CacheUnavailable(anyhow::anyhow!("timeout")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AuthError::Repository(anyhow::anyhow!("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_only_cache_errors_are_retryable() {
        assert!(AuthError::CacheUnavailable(anyhow::anyhow!("down")).is_retryable());
        assert!(!AuthError::Expired.is_retryable());
        assert!(!AuthError::not_found("role", 1).is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            AuthError::not_found("department", 42).to_string(),
            "department 42 not found"
        );
    }
}
