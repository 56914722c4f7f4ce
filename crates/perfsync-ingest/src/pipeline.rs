//! One sync cycle: fetch a report, then reconcile it into the datastore

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::SyncError;
use crate::fetcher::{FetchReport, Fetcher, ReportDimensions, ReportSource};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::store::AggregationStore;

/// What a completed pass did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub dimensions: ReportDimensions,
    pub date: NaiveDate,
    pub fetched: usize,
    pub fetch: FetchReport,
    pub reconcile: ReconcileSummary,
}

impl SyncSummary {
    pub fn inserted(&self) -> u64 {
        self.reconcile.result.inserted
    }

    pub fn modified(&self) -> u64 {
        self.reconcile.result.modified
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.reconcile.result.failed_keys()
    }
}

/// Result of one `(dimensions, date)` pass of a backfill
#[derive(Debug)]
pub struct BackfillPass {
    pub dimensions: ReportDimensions,
    pub date: NaiveDate,
    pub result: Result<SyncSummary, SyncError>,
}

pub struct SyncPipeline<R, S> {
    fetcher: Fetcher<R>,
    reconciler: Reconciler<S>,
    backfill_concurrency: usize,
}

impl<R: ReportSource, S: AggregationStore> SyncPipeline<R, S> {
    pub fn new(fetcher: Fetcher<R>, reconciler: Reconciler<S>) -> Self {
        Self {
            fetcher,
            reconciler,
            backfill_concurrency: 1,
        }
    }

    pub fn with_backfill_concurrency(mut self, concurrency: usize) -> Self {
        self.backfill_concurrency = concurrency.max(1);
        self
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// Fetch every record for `dimensions` on `date` and upsert them
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        dimensions: ReportDimensions,
        date: NaiveDate,
    ) -> Result<SyncSummary, SyncError> {
        let outcome = self.fetcher.fetch_all(dimensions, date).await?;
        let fetched = outcome.records.len();

        let reconcile = self.reconciler.reconcile(&outcome.records, date).await?;

        let summary = SyncSummary {
            dimensions,
            date,
            fetched,
            fetch: outcome.report,
            reconcile,
        };

        if summary.fetch.pages_failed() > 0 || summary.reconcile.result.is_partial_failure() {
            warn!(
                fetched,
                failed_pages = summary.fetch.pages_failed(),
                failed_keys = summary.reconcile.result.failures.len(),
                "Sync pass completed with losses"
            );
        } else {
            info!(
                fetched,
                inserted = summary.inserted(),
                modified = summary.modified(),
                "Sync pass completed"
            );
        }

        Ok(summary)
    }

    /// Run every `(dimensions, date)` pass, a bounded number at a time.
    ///
    /// A failed pass does not stop the others. Results come back ordered by
    /// date, then report type.
    #[instrument(skip(self, reports, dates), fields(reports = reports.len(), dates = dates.len()))]
    pub async fn backfill(
        &self,
        reports: &[ReportDimensions],
        dates: &[NaiveDate],
    ) -> Vec<BackfillPass> {
        let passes: Vec<(ReportDimensions, NaiveDate)> = dates
            .iter()
            .flat_map(|date| reports.iter().map(move |dimensions| (*dimensions, *date)))
            .collect();

        info!(
            passes = passes.len(),
            concurrency = self.backfill_concurrency,
            "Starting backfill"
        );

        let mut results: Vec<BackfillPass> = stream::iter(passes)
            .map(|(dimensions, date)| async move {
                let result = self.sync(dimensions, date).await;
                if let Err(err) = &result {
                    error!(%dimensions, %date, error = %err, "Backfill pass failed");
                }
                BackfillPass {
                    dimensions,
                    date,
                    result,
                }
            })
            .buffer_unordered(self.backfill_concurrency)
            .collect()
            .await;

        results.sort_by_key(|pass| (pass.date, pass.dimensions));

        let failed = results.iter().filter(|pass| pass.result.is_err()).count();
        info!(passes = results.len(), failed, "Backfill finished");

        results
    }
}
