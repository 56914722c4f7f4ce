//! In-process datastore for dry runs and tests

use async_trait::async_trait;
use chrono::NaiveDate;
use perfsync_common::types::{AggregationRecord, PerformanceMetrics};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::{
    validate_record, AggregateQuery, AggregationStore, BulkWriteOutcome, DailyTotals,
    FailedUpsert, RecordFilter, StoreError, UpsertOperation,
};

/// Map-backed [`AggregationStore`] with the same upsert semantics as the
/// Postgres store.
///
/// Connectivity, whole-call failures and per-key rejections can be scripted to
/// exercise the gateway and reconciler.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, AggregationRecord>>,
    disconnected: AtomicBool,
    scripted_failures: Mutex<VecDeque<StoreError>>,
    rejected_keys: Mutex<HashMap<String, String>>,
    bulk_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Fail the next operations, one error per call, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.scripted_failures).extend(errors);
    }

    /// Reject writes of `key` with `reason`
    pub fn reject_key(&self, key: impl Into<String>, reason: impl Into<String>) {
        lock(&self.rejected_keys).insert(key.into(), reason.into());
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<AggregationRecord> {
        lock(&self.records).get(key).cloned()
    }

    pub fn snapshot(&self) -> Vec<AggregationRecord> {
        lock(&self.records).values().cloned().collect()
    }

    /// Bulk write calls that reached the store, including failed ones
    pub fn bulk_calls(&self) -> u32 {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn take_scripted_failure(&self) -> Result<(), StoreError> {
        match lock(&self.scripted_failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// A poisoned lock only means a panicking test thread held it; the map is
// still consistent.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AggregationStore for MemoryStore {
    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    async fn find(&self, filter: &RecordFilter) -> Result<Vec<AggregationRecord>, StoreError> {
        self.take_scripted_failure()?;

        let mut found: Vec<AggregationRecord> = lock(&self.records)
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.composite_key.cmp(&b.composite_key)));
        found.truncate(filter.limit.max(0) as usize);
        Ok(found)
    }

    async fn bulk_upsert(
        &self,
        operations: &[UpsertOperation],
    ) -> Result<BulkWriteOutcome, StoreError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.take_scripted_failure()?;

        let rejected = lock(&self.rejected_keys).clone();
        let mut records = lock(&self.records);
        let mut outcome = BulkWriteOutcome::default();

        for op in operations {
            let rejection = validate_record(&op.record)
                .err()
                .or_else(|| rejected.get(op.key()).cloned());
            if let Some(error) = rejection {
                outcome.failures.push(FailedUpsert {
                    key: op.key().to_string(),
                    error,
                });
                continue;
            }

            match records.insert(op.key().to_string(), op.record.clone()) {
                Some(_) => outcome.record_existing(),
                None => outcome.inserted += 1,
            }
        }

        Ok(outcome)
    }

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<DailyTotals>, StoreError> {
        self.take_scripted_failure()?;

        let mut groups: BTreeMap<(NaiveDate, String), (i64, PerformanceMetrics)> = BTreeMap::new();
        for record in lock(&self.records).values() {
            let day = record.date.date_naive();
            if day < query.date_from || day > query.date_to {
                continue;
            }
            if query.st.as_deref().is_some_and(|st| st != record.st) {
                continue;
            }

            let (count, totals) = groups.entry((day, record.st.clone())).or_default();
            *count += 1;
            totals.clicks += record.metrics.clicks;
            totals.conversions += record.metrics.conversions;
            totals.cost += record.metrics.cost;
            totals.profit += record.metrics.profit;
            totals.revenue += record.metrics.revenue;
        }

        Ok(groups
            .into_iter()
            .map(|((date, st), (records, mut metrics))| {
                metrics.recompute_ratios();
                DailyTotals {
                    date,
                    st,
                    records,
                    metrics,
                }
            })
            .collect())
    }
}
