//! Error types for the authorization service

use thiserror::Error;

use crate::permission::PatternError;

/// Authorization service errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Actor lacks delegation rights for the requested grant or revocation
    #[error("Not authorized: actor '{actor}' cannot manage role '{role}' at {scope}/{instance}: {reason}")]
    NotAuthorized {
        actor: String,
        role: String,
        scope: String,
        instance: String,
        reason: String,
    },

    /// Target user does not exist in the identity store
    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    /// Registry has no such role at the given scope
    #[error("Unknown role '{role}' in scope '{scope}'")]
    UnknownRole { role: String, scope: String },

    /// Registry has no such scope
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Malformed permission pattern or requested permission
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Duplicate assignment; absorbed by the store, never returned to callers
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection, statement or transaction failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Deadline or cancellation signal fired mid-operation
    #[error("Operation cancelled")]
    Cancelled,

    /// A bulk operation stopped at a failing item
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Whether a caller may retry the operation with backoff.
    ///
    /// Only store unavailability qualifies; authorization failures are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Bulk(bulk) => bulk.source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error was caused by cancellation, directly or inside a bulk operation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Bulk(bulk) => bulk.source.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn not_authorized(
        actor: &str,
        role: &str,
        scope: &str,
        instance: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::NotAuthorized {
            actor: actor.to_string(),
            role: role.to_string(),
            scope: scope.to_string(),
            instance: instance.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthzError::Conflict(db.message().to_string())
            }
            _ => AuthzError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<PatternError> for AuthzError {
    fn from(err: PatternError) -> Self {
        AuthzError::InvalidPermission(err.to_string())
    }
}

/// Failure report for `assign_multiple` / `revoke_multiple`
///
/// `committed` items before `index` were applied and stay applied;
/// the item at `index` and everything after it were not.
#[derive(Debug, Error)]
#[error("Bulk operation stopped at item {index} after {committed} committed: {source}")]
pub struct BulkError {
    /// Position of the failing item in the request
    pub index: usize,
    /// Number of items committed before the failure
    pub committed: usize,
    /// Cause of the failure
    #[source]
    pub source: Box<AuthzError>,
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
