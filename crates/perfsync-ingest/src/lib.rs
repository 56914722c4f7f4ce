//! Perfsync Ingest
//!
//! Pulls advertising-performance reports from a paginated, rate-limited
//! reporting API and upserts them into a PostgreSQL aggregation table.
//!
//! - [`fetcher`]: bounded-concurrency paginated fetch, output in offset order
//! - [`store`]: datastore trait, Postgres and in-memory stores, and the
//!   retrying [`store::StoreGateway`]
//! - [`reconcile`]: composite keys and idempotent bulk upserts
//! - [`pipeline`]: one fetch-and-reconcile pass, and multi-day backfills
//!
//! # Example
//!
//! ```no_run
//! use perfsync_ingest::config::Config;
//! use perfsync_ingest::fetcher::{Fetcher, FetchSettings, HttpReportSource, ReportDimensions};
//! use perfsync_ingest::pipeline::SyncPipeline;
//! use perfsync_ingest::reconcile::Reconciler;
//! use perfsync_ingest::store::{PgAggregationStore, StoreGateway};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let fetcher = Fetcher::new(HttpReportSource::new(&config.api)?, FetchSettings::from(&config.api));
//! let store = PgAggregationStore::connect_lazy(&config.database)?;
//! let reconciler = Reconciler::new(StoreGateway::new(store, config.retry));
//!
//! let pipeline = SyncPipeline::new(fetcher, reconciler);
//! let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap_or_default();
//! let summary = pipeline.sync(ReportDimensions::CampaignSubId, date).await?;
//! println!("{} inserted, {} modified", summary.inserted(), summary.modified());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod reconcile;
pub mod store;

pub use error::SyncError;
