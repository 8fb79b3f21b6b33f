//! Global application error types and handlers.
//!
//! This module defines the error taxonomy shared by the repositories, the
//! session services and the HTTP layer. Cache failures have their own type in
//! `crate::cache` because they never reach a caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Generic service error that can be used across all entities
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {identifier}")]
    NotFound { entity: String, identifier: String },

    #[error("{entity} already exists: {identifier}")]
    AlreadyExists { entity: String, identifier: String },

    #[error("{entity} has expired")]
    Expired { entity: String },

    #[error("{entity} has already been revoked")]
    AlreadyRevoked { entity: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Caller is under an active ban.
    #[error("User is banned: {cause}")]
    Banned {
        cause: String,
        expired_at: Option<DateTime<Utc>>,
        is_forever: bool,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Database error: {source}")]
    Database {
        #[source]
        source: anyhow::Error,
    },

    /// A store call exceeded its deadline. Safe to retry.
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("External service error: {message}")]
    ExternalService { message: String },
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<sqlx::Error> for ServiceError {
    fn from(source: sqlx::Error) -> Self {
        if is_lock_contention(&source) {
            return Self::timeout("database is busy");
        }
        Self::Database {
            source: source.into(),
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(source: anyhow::Error) -> Self {
        if source
            .downcast_ref::<sqlx::Error>()
            .is_some_and(is_lock_contention)
        {
            return Self::timeout("database is busy");
        }
        Self::Database { source }
    }
}

/// `SQLITE_BUSY` or `SQLITE_LOCKED`, including their extended codes.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

impl ServiceError {
    // Helper constructors for common patterns

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            identifier: identifier.into(),
        }
    }

    pub fn already_exists(entity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            identifier: identifier.into(),
        }
    }

    pub fn expired(entity: impl Into<String>) -> Self {
        Self::Expired {
            entity: entity.into(),
        }
    }

    pub fn already_revoked(entity: impl Into<String>) -> Self {
        Self::AlreadyRevoked {
            entity: entity.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::ExternalService {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True for errors that describe a bad, stale or unknown credential.
    ///
    /// The auth endpoints collapse all of these into a single
    /// `Unauthorized` so callers cannot probe which case applied.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Expired { .. }
                | Self::AlreadyRevoked { .. }
                | Self::Unauthorized { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_errors_stay_database_errors() {
        let error = ServiceError::from(anyhow::anyhow!("disk full"));
        assert!(matches!(error, ServiceError::Database { .. }));

        let error = ServiceError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, ServiceError::Database { .. }));
    }

    #[tokio::test]
    async fn test_busy_database_maps_to_timeout() {
        let (pool, _dir) = crate::database::file_test_pool(2).await;
        let _writer = crate::database::begin_immediate(&pool).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("PRAGMA busy_timeout = 0")
            .execute(&mut *conn)
            .await
            .unwrap();
        let blocked = sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .unwrap_err();

        assert!(matches!(ServiceError::from(blocked), ServiceError::Timeout { .. }));
    }
}
