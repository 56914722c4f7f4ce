//! Persistence of aggregation records
//!
//! [`AggregationStore`] is the raw datastore seam. Nothing outside this module
//! calls it directly: every read and write goes through [`StoreGateway`],
//! which adds the liveness wait and retry policy.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;
use chrono::NaiveDate;
use perfsync_common::types::{AggregationRecord, PerformanceMetrics};
use serde::Serialize;

pub use error::StoreError;
pub use gateway::StoreGateway;
pub use memory::MemoryStore;
pub use postgres::PgAggregationStore;
pub use retry::RetryPolicy;

/// Upper bound on rows returned by a bounded read
pub const DEFAULT_FIND_LIMIT: i64 = 1000;

/// Raw datastore operations. Implementations report failures as they happen;
/// retrying is the gateway's job.
#[async_trait]
pub trait AggregationStore: Send + Sync + 'static {
    /// Cheap liveness probe
    async fn is_connected(&self) -> bool;

    /// Bounded read with filter, ordered by date then key
    async fn find(&self, filter: &RecordFilter) -> Result<Vec<AggregationRecord>, StoreError>;

    /// Unordered insert-or-replace keyed by composite key.
    ///
    /// Per-record rejections are reported in [`BulkWriteOutcome::failures`];
    /// an `Err` means the bulk as a whole did not complete and may be
    /// resubmitted.
    async fn bulk_upsert(
        &self,
        operations: &[UpsertOperation],
    ) -> Result<BulkWriteOutcome, StoreError>;

    /// Per-day, per-sub-type totals over a date range
    async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<DailyTotals>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    /// Inclusive
    pub date_from: Option<NaiveDate>,
    /// Inclusive
    pub date_to: Option<NaiveDate>,
    pub pt: Option<String>,
    pub st: Option<String>,
    pub limit: i64,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            pt: None,
            st: None,
            limit: DEFAULT_FIND_LIMIT,
        }
    }
}

impl RecordFilter {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date_from: Some(date),
            date_to: Some(date),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AggregationRecord) -> bool {
        let day = record.date.date_naive();
        self.date_from.is_none_or(|from| day >= from)
            && self.date_to.is_none_or(|to| day <= to)
            && self.pt.as_deref().is_none_or(|pt| record.pt == pt)
            && self.st.as_deref().is_none_or(|st| record.st == st)
    }
}

/// Update-if-match-else-insert of one normalized record
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOperation {
    pub record: AggregationRecord,
}

impl UpsertOperation {
    pub fn new(record: AggregationRecord) -> Self {
        Self { record }
    }

    pub fn key(&self) -> &str {
        &self.record.composite_key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUpsert {
    pub key: String,
    pub error: String,
}

/// Result of one bulk write. `matched` and `modified` both count rows that
/// existed before the write; `inserted` counts new rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkWriteOutcome {
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
    pub failures: Vec<FailedUpsert>,
}

impl BulkWriteOutcome {
    pub fn merge(&mut self, other: BulkWriteOutcome) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.inserted += other.inserted;
        self.failures.extend(other.failures);
    }

    pub fn record_existing(&mut self) {
        self.matched += 1;
        self.modified += 1;
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateQuery {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub st: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub st: String,
    pub records: i64,
    pub metrics: PerformanceMetrics,
}

/// Checks applied to a record before it is written. A failing record is
/// reported as a failed key instead of reaching the datastore.
pub fn validate_record(record: &AggregationRecord) -> Result<(), String> {
    if record.composite_key.is_empty() {
        return Err("composite key is empty".to_string());
    }

    let m = &record.metrics;
    if m.clicks < 0 || m.conversions < 0 {
        return Err(format!(
            "negative counters (clicks={}, conversions={})",
            m.clicks, m.conversions
        ));
    }

    let values = [
        ("cost", m.cost),
        ("profit", m.profit),
        ("revenue", m.revenue),
        ("cpc", m.cpc),
        ("epc", m.epc),
        ("cr", m.cr),
        ("roi", m.roi),
    ];
    if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
        return Err(format!("{} is not a finite number ({})", name, value));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use perfsync_common::types::report_date::midnight_utc;

    fn record(key: &str, day: u32) -> AggregationRecord {
        AggregationRecord {
            composite_key: key.to_string(),
            pt: "push".into(),
            pv: "classic".into(),
            st: "zone".into(),
            sv: "5511".into(),
            date: midnight_utc(NaiveDate::from_ymd_opt(2024, 1, day).unwrap()),
            ts: vec![300],
            zone_id: Some("5511".into()),
            campaign_id: None,
            campaign_name: None,
            metrics: PerformanceMetrics::from_counters(10, 1, 2.0, 1.0, 3.0),
        }
    }

    #[test]
    fn test_filter_matches_inclusive_range() {
        let filter = RecordFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 1, 2),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 3),
            st: Some("zone".into()),
            ..RecordFilter::default()
        };

        assert!(!filter.matches(&record("a", 1)));
        assert!(filter.matches(&record("a", 2)));
        assert!(filter.matches(&record("a", 3)));
        assert!(!filter.matches(&record("a", 4)));

        let mut other = record("a", 2);
        other.st = "subid".into();
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_validate_record() {
        assert!(validate_record(&record("a", 1)).is_ok());

        assert!(validate_record(&record("", 1)).is_err());

        let mut negative = record("a", 1);
        negative.metrics.clicks = -1;
        assert!(validate_record(&negative).unwrap_err().contains("negative"));

        let mut nan = record("a", 1);
        nan.metrics.cost = f64::NAN;
        assert!(validate_record(&nan).unwrap_err().starts_with("cost"));
    }

    #[test]
    fn test_outcome_merge() {
        let mut total = BulkWriteOutcome {
            inserted: 2,
            ..Default::default()
        };
        let mut other = BulkWriteOutcome::default();
        other.record_existing();
        other.failures.push(FailedUpsert {
            key: "k".into(),
            error: "bad".into(),
        });

        total.merge(other);

        assert_eq!(total.inserted, 2);
        assert_eq!(total.matched, 1);
        assert_eq!(total.modified, 1);
        assert_eq!(total.failed_keys(), vec!["k"]);
        assert!(total.is_partial_failure());
    }
}
