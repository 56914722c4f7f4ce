//! Errors of a sync cycle

use thiserror::Error;

use crate::fetcher::RemoteFetchError;
use crate::store::StoreError;

/// A sync pass failed fatally. Partial upsert failures are not errors; they
/// are reported in the pass summary.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] RemoteFetchError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}
