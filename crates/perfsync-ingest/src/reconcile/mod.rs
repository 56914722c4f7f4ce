//! Deduplication and idempotent upsert of fetched records
//!
//! A reconciliation pass normalizes every fetched record, keys it by its
//! composite key, collapses records that share a key (the later one wins) and
//! submits the result as one unordered bulk upsert through the gateway.
//! Replaying a pass leaves the stored set unchanged.

pub mod key;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::fetcher::RawPerformanceRecord;
use crate::store::{AggregationStore, BulkWriteOutcome, StoreError, StoreGateway, UpsertOperation};

pub use key::{canonical_ts, composite_key, normalize};

/// Failed keys printed in a single log line
const LOGGED_FAILED_KEYS: usize = 20;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Records handed to the pass
    pub received: usize,
    /// Upsert operations submitted after collapsing shared keys
    pub submitted: usize,
    /// Records dropped because a later record had the same key
    pub collapsed: usize,
    pub result: BulkWriteOutcome,
}

pub struct Reconciler<S> {
    gateway: StoreGateway<S>,
}

impl<S: AggregationStore> Reconciler<S> {
    pub fn new(gateway: StoreGateway<S>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &StoreGateway<S> {
        &self.gateway
    }

    /// Build one upsert per distinct composite key.
    ///
    /// When several records share a key, the last one in input order is kept
    /// at the position of the first.
    pub fn prepare(records: &[RawPerformanceRecord], report_date: NaiveDate) -> Vec<UpsertOperation> {
        let mut operations: Vec<UpsertOperation> = Vec::with_capacity(records.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());

        for raw in records {
            let record = normalize(raw, report_date);
            match positions.get(&record.composite_key) {
                Some(&index) => operations[index] = UpsertOperation::new(record),
                None => {
                    positions.insert(record.composite_key.clone(), operations.len());
                    operations.push(UpsertOperation::new(record));
                },
            }
        }

        operations
    }

    /// Normalize, key and upsert `records`. Per-key failures are returned in
    /// the summary; only a failure of the bulk write as a whole is an error.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn reconcile(
        &self,
        records: &[RawPerformanceRecord],
        report_date: NaiveDate,
    ) -> Result<ReconcileSummary, StoreError> {
        let operations = Self::prepare(records, report_date);
        let collapsed = records.len() - operations.len();

        let result = self.gateway.bulk_upsert(&operations).await?;

        if result.is_partial_failure() {
            let keys = result.failed_keys();
            let shown = &keys[..keys.len().min(LOGGED_FAILED_KEYS)];
            warn!(
                failed = keys.len(),
                keys = ?shown,
                "Some records were not written"
            );
        }

        info!(
            submitted = operations.len(),
            collapsed,
            inserted = result.inserted,
            modified = result.modified,
            failed = result.failures.len(),
            "Reconciliation pass complete"
        );

        Ok(ReconcileSummary {
            received: records.len(),
            submitted: operations.len(),
            collapsed,
            result,
        })
    }
}
