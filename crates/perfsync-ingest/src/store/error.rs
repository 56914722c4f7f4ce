//! Datastore errors and their transient/fatal classification

use std::time::Duration;
use thiserror::Error;

/// Lower-cased fragments of error messages that indicate a network-layer
/// failure worth retrying
const RETRYABLE_PHRASES: &[&str] = &[
    "econnrefused",
    "connection refused",
    "etimedout",
    "timed out",
    "enotfound",
    "host not found",
    "network",
    "topology was destroyed",
    "socket hang up",
    "econnreset",
    "connection reset",
    "no primary found",
];

#[derive(Debug, Error)]
pub enum StoreError {
    /// The liveness wait expired. Fatal.
    #[error("Datastore not reachable after waiting {waited:?}")]
    ConnectionTimeout { waited: Duration },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid record '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    /// Backend failure known only by its message
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::ConnectionTimeout { .. } => false,
            StoreError::Database(err) => sqlx_error_is_retryable(err),
            StoreError::Migration(_) => false,
            StoreError::InvalidRecord { .. } => false,
            StoreError::Backend(msg) => message_is_retryable(msg),
        }
    }
}

fn sqlx_error_is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => sqlstate_is_retryable(&code),
            None => message_is_retryable(db.message()),
        },
        _ => false,
    }
}

/// Connection exceptions (class 08), server shutdown or startup (57P01-03),
/// serialization failures and deadlocks
pub fn sqlstate_is_retryable(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "40001" | "40P01")
}

pub fn message_is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_PHRASES.iter().any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_connection_level_sqlx_errors_are_retryable() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(StoreError::from(sqlx::Error::Io(refused)).is_retryable());
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_retryable());
        assert!(StoreError::from(sqlx::Error::Protocol("unexpected eof".into())).is_retryable());
    }

    #[test]
    fn test_other_sqlx_errors_are_fatal() {
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(!StoreError::from(sqlx::Error::ColumnNotFound("ts".into())).is_retryable());
    }

    #[test]
    fn test_sqlstate_classes() {
        assert!(sqlstate_is_retryable("08006"));
        assert!(sqlstate_is_retryable("08001"));
        assert!(sqlstate_is_retryable("57P01"));
        assert!(sqlstate_is_retryable("40P01"));
        assert!(sqlstate_is_retryable("40001"));
        assert!(!sqlstate_is_retryable("23505"));
        assert!(!sqlstate_is_retryable("22P02"));
        assert!(!sqlstate_is_retryable("42P01"));
    }

    #[test]
    fn test_message_phrases() {
        assert!(StoreError::backend("connect ECONNREFUSED 127.0.0.1:5432").is_retryable());
        assert!(StoreError::backend("Server selection timed out after 30000 ms").is_retryable());
        assert!(StoreError::backend("Topology was destroyed").is_retryable());
        assert!(StoreError::backend("socket hang up").is_retryable());
        assert!(StoreError::backend("No primary found in replica set").is_retryable());
        assert!(!StoreError::backend("E11000 duplicate key error").is_retryable());
        assert!(!StoreError::backend("document failed validation").is_retryable());
    }

    #[test]
    fn test_timeout_and_validation_are_fatal() {
        let timeout = StoreError::ConnectionTimeout {
            waited: Duration::from_secs(30),
        };
        assert!(!timeout.is_retryable());

        let invalid = StoreError::InvalidRecord {
            key: "k".into(),
            reason: "network clicks negative".into(),
        };
        assert!(!invalid.is_retryable());
    }
}
