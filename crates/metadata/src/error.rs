//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Map a unique-constraint violation to `AlreadyExists`, keeping other errors.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match err.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::AlreadyExists(what()),
            _ => Self::Database(err),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_error_is_kept() {
        let err = MetadataError::from_insert(sqlx::Error::RowNotFound, || "x".to_string());
        assert!(matches!(err, MetadataError::Database(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_state_transition_display() {
        let err = MetadataError::InvalidStateTransition {
            from: "cancelled".to_string(),
            to: "completed".to_string(),
        };
        assert_eq!(err.to_string(), "invalid state transition: cancelled -> completed");
    }
}
