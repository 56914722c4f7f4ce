//! Perfsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the perfsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error and result types
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//! - **Types**: The persisted aggregation record, its metrics, and date helpers
//!
//! # Example
//!
//! ```no_run
//! use perfsync_common::types::report_date;
//!
//! fn parse(raw: &str) -> perfsync_common::Result<()> {
//!     let date = report_date::parse_report_date(raw)?;
//!     println!("Normalized date: {}", report_date::iso_midnight(date));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PerfsyncError, Result};
