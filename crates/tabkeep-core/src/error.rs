//! Error types for tabkeep-core

use thiserror::Error;

/// Result type alias using tabkeep-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Message recorded in the sync status when an attempt is cancelled.
pub const ABORTED_MESSAGE: &str = "Sync Aborted";

/// Errors that can occur in tabkeep-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or rejected credentials (e.g. HTTP 401)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The user declined consent for the remote store
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The sync attempt was cancelled
    #[error("Sync Aborted")]
    Aborted,

    /// Network or server failure that may succeed on retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The remote object changed underneath a conditional write
    #[error("Remote data changed: {0}")]
    DataChanged(String),

    /// Snapshot failed schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Requested key or object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a failed sync attempt is reflected in the sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials are missing or invalid.
    Auth,
    /// The attempt was cancelled.
    Aborted,
    /// The user declined consent.
    PermissionDenied,
    /// Everything else.
    Other,
}

impl Error {
    /// Classify this error for status transitions.
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::Aborted => FailureKind::Aborted,
            Self::PermissionDenied(_) => FailureKind::PermissionDenied,
            _ => FailureKind::Other,
        }
    }

    /// Whether a remote call failing with this error should be retried.
    ///
    /// Auth, abort, consent and conflict failures surface on first occurrence.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Auth(_)
                | Self::Aborted
                | Self::PermissionDenied(_)
                | Self::DataChanged(_)
                | Self::Validation(_)
                | Self::InvalidInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_errors_bypass_retry() {
        assert!(!Error::Auth("401".to_string()).is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::PermissionDenied("declined".to_string()).is_retryable());
        assert!(!Error::DataChanged("etag".to_string()).is_retryable());
        assert!(Error::Transient("timeout".to_string()).is_retryable());
        assert!(Error::NotFound("snapshot".to_string()).is_retryable());
    }

    #[test]
    fn test_aborted_displays_status_message() {
        assert_eq!(Error::Aborted.to_string(), ABORTED_MESSAGE);
        assert_eq!(Error::Aborted.failure_kind(), FailureKind::Aborted);
        assert_eq!(
            Error::Auth("expired".to_string()).failure_kind(),
            FailureKind::Auth
        );
    }
}
