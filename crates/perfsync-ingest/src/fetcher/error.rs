//! Fetch error types

use thiserror::Error;

/// A single page request failed. Transient: the fetcher skips the page and
/// carries on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed page: {0}")]
    Decode(String),
}

/// The fetch as a whole could not be carried out. Never retried.
#[derive(Debug, Error)]
pub enum RemoteFetchError {
    #[error("Invalid report request: {0}")]
    InvalidRequest(String),

    #[error("Request limiter closed while scheduling page at offset {offset}")]
    LimiterClosed { offset: u64 },

    #[error("Page task failed to complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}
