//! Paginated, concurrency-bounded report retrieval
//!
//! A fetch walks the report in rounds. Each round fires `batch_width` page
//! requests at consecutive offsets, waits for all of them, re-sorts the pages
//! by offset and appends them. Rounds are strictly sequential; the fetch stops
//! after the first round in which any page reports
//! `offset + page_size >= total_count`.
//!
//! Individual page failures are absorbed: the page is logged, counted in the
//! [`FetchReport`] and skipped. Only answered pages take part in the
//! end-of-data check, so a lost page never cuts later rounds short. A round in
//! which no page answered ends the fetch. Only scheduling failures (a closed
//! limiter, a panicked page task) abort it.

pub mod client;
pub mod dimensions;
pub mod error;
pub mod models;

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

pub use client::{HttpReportSource, ReportSource};
pub use dimensions::{GroupingDimension, ReportDimensions};
pub use error::{FetchError, RemoteFetchError};
pub use models::{RawPerformanceRecord, ReportPage, ReportQuery};

use crate::config::ApiConfig;

/// Records requested per page
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// Page requests per round, and the cap on requests in flight
pub const DEFAULT_BATCH_WIDTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub page_size: u64,
    pub batch_width: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_width: DEFAULT_BATCH_WIDTH,
        }
    }
}

impl From<&ApiConfig> for FetchSettings {
    fn from(config: &ApiConfig) -> Self {
        Self {
            page_size: config.page_size,
            batch_width: config.batch_width,
        }
    }
}

/// What a fetch observed, so that skipped pages never go unnoticed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub rounds: u32,
    pub pages_requested: u32,
    /// Offsets whose request failed and were skipped
    pub failed_offsets: Vec<u64>,
    /// Last `total_count` reported by a successful page
    pub total_count: Option<u64>,
    pub records: usize,
}

impl FetchReport {
    pub fn pages_failed(&self) -> usize {
        self.failed_offsets.len()
    }

    /// Records the API announced but the fetch did not return
    pub fn missing_records(&self) -> u64 {
        self.total_count
            .unwrap_or(0)
            .saturating_sub(self.records as u64)
    }
}

/// Records in offset order plus the fetch report
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: Vec<RawPerformanceRecord>,
    pub report: FetchReport,
}

type PageResult = (u64, Result<ReportPage, FetchError>);

/// Pulls complete reports from a [`ReportSource`]
pub struct Fetcher<S> {
    source: Arc<S>,
    limiter: Arc<Semaphore>,
    settings: FetchSettings,
}

impl<S: ReportSource> Fetcher<S> {
    /// The limiter is created here and shared by every fetch run through this
    /// fetcher, including concurrent ones.
    pub fn new(source: S, settings: FetchSettings) -> Self {
        let settings = FetchSettings {
            page_size: settings.page_size.max(1),
            batch_width: settings.batch_width.max(1),
        };

        Self {
            source: Arc::new(source),
            limiter: Arc::new(Semaphore::new(settings.batch_width)),
            settings,
        }
    }

    pub fn settings(&self) -> FetchSettings {
        self.settings
    }

    /// Fetch every record of `dimensions` for `date`, in offset order
    #[instrument(skip(self))]
    pub async fn fetch_all(
        &self,
        dimensions: ReportDimensions,
        date: NaiveDate,
    ) -> Result<FetchOutcome, RemoteFetchError> {
        let query = Arc::new(ReportQuery::new(dimensions, date));
        let page_size = self.settings.page_size;
        let round_span = self.settings.batch_width as u64 * page_size;

        let mut records = Vec::new();
        let mut report = FetchReport::default();
        let mut offset = 0u64;

        loop {
            report.rounds += 1;
            let pages = self.run_round(&query, offset).await?;
            let mut exhausted = false;
            let mut answered = 0usize;

            for (page_offset, result) in pages {
                report.pages_requested += 1;

                match result {
                    Ok(page) => {
                        answered += 1;
                        let total_count = page.totals.total_count;
                        report.total_count = Some(total_count);
                        if page_offset + page_size >= total_count {
                            exhausted = true;
                        }
                        records.extend(page.report);
                    },
                    Err(err) => {
                        warn!(
                            offset = page_offset,
                            error = %err,
                            "Page request failed; skipping page"
                        );
                        report.failed_offsets.push(page_offset);
                    },
                }
            }

            debug!(
                round = report.rounds,
                offset,
                records = records.len(),
                answered,
                exhausted,
                "Round complete"
            );

            if answered == 0 {
                warn!(round = report.rounds, offset, "No page of the round answered; stopping fetch");
                break;
            }
            if exhausted {
                break;
            }
            offset += round_span;
        }

        report.records = records.len();

        if report.failed_offsets.is_empty() {
            info!(
                records = report.records,
                rounds = report.rounds,
                pages = report.pages_requested,
                "Fetch complete"
            );
        } else {
            warn!(
                records = report.records,
                rounds = report.rounds,
                pages = report.pages_requested,
                failed_pages = report.pages_failed(),
                missing = report.missing_records(),
                "Fetch complete with failed pages"
            );
        }

        Ok(FetchOutcome { records, report })
    }

    /// Issue one round of page requests and return the pages sorted by offset
    async fn run_round(
        &self,
        query: &Arc<ReportQuery>,
        offset: u64,
    ) -> Result<Vec<PageResult>, RemoteFetchError> {
        let mut tasks = JoinSet::new();

        for slot in 0..self.settings.batch_width {
            let page_offset = offset + slot as u64 * self.settings.page_size;
            let limit = self.settings.page_size;
            let source = Arc::clone(&self.source);
            let limiter = Arc::clone(&self.limiter);
            let query = Arc::clone(query);

            tasks.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| RemoteFetchError::LimiterClosed { offset: page_offset })?;
                let page = source.fetch_page(&query, page_offset, limit).await;
                Ok::<PageResult, RemoteFetchError>((page_offset, page))
            });
        }

        // Pages arrive in completion order
        let mut pages = Vec::with_capacity(self.settings.batch_width);
        while let Some(joined) = tasks.join_next().await {
            pages.push(joined??);
        }

        pages.sort_by_key(|(page_offset, _)| *page_offset);
        Ok(pages)
    }
}
