//! Error types shared across perfsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, PerfsyncError>;

/// Errors raised by shared helpers (dates, enumerated values)
#[derive(Error, Debug)]
pub enum PerfsyncError {
    #[error("Invalid date '{value}': expected YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339")]
    InvalidDate { value: String },

    #[error("Invalid date range: {from} is after {to}")]
    InvalidDateRange { from: String, to: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PerfsyncError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
