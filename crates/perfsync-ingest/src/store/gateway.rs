//! Resilient access to an [`AggregationStore`]
//!
//! Every operation runs through [`StoreGateway::with_retry`]: wait for the
//! datastore to be live, run the operation, and on a retryable failure back
//! off and try again until the policy's attempt budget is spent. Fatal
//! failures and the last retryable failure are returned unchanged.

use perfsync_common::types::AggregationRecord;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::error::StoreError;
use super::retry::RetryPolicy;
use super::{
    AggregateQuery, AggregationStore, BulkWriteOutcome, DailyTotals, RecordFilter, UpsertOperation,
};

/// How long to wait for a datastore that is not live
pub const DEFAULT_CONNECTION_WAIT: Duration = Duration::from_secs(30);

/// Liveness polling interval during the wait
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct StoreGateway<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    connection_wait: Duration,
    poll_interval: Duration,
}

impl<S> Clone for StoreGateway<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            connection_wait: self.connection_wait,
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: AggregationStore> StoreGateway<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self::from_arc(Arc::new(store), policy)
    }

    pub fn from_arc(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            connection_wait: DEFAULT_CONNECTION_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_connection_wait(mut self, wait: Duration, poll_interval: Duration) -> Self {
        self.connection_wait = wait;
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Return once the datastore is live, or fail with
    /// [`StoreError::ConnectionTimeout`] after the connection wait
    pub async fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.store.is_connected().await {
            return Ok(());
        }

        warn!(
            wait_secs = self.connection_wait.as_secs(),
            "Datastore not connected; waiting for it to come back"
        );

        let started = Instant::now();
        loop {
            if started.elapsed() >= self.connection_wait {
                error!(waited_secs = started.elapsed().as_secs(), "Datastore still not connected");
                return Err(StoreError::ConnectionTimeout {
                    waited: started.elapsed(),
                });
            }

            sleep(self.poll_interval).await;

            if self.store.is_connected().await {
                info!(waited_ms = started.elapsed().as_millis() as u64, "Datastore connected");
                return Ok(());
            }
        }
    }

    /// Run `operation` under the gateway's retry policy
    pub async fn with_retry<T, F, Fut>(&self, context: &str, operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.with_retry_policy(context, self.policy, operation).await
    }

    /// Run `operation` under an explicit retry policy
    pub async fn with_retry_policy<T, F, Fut>(
        &self,
        context: &str,
        policy: RetryPolicy,
        mut operation: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            self.ensure_connected().await?;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(context, attempt, "Datastore operation succeeded after retry");
                    } else {
                        debug!(context, "Datastore operation succeeded");
                    }
                    return Ok(value);
                },
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        context,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable datastore error; backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    error!(
                        context,
                        attempt,
                        retryable = err.is_retryable(),
                        error = %err,
                        "Datastore operation failed"
                    );
                    return Err(err);
                },
            }
        }
    }

    pub async fn find(&self, filter: &RecordFilter) -> Result<Vec<AggregationRecord>, StoreError> {
        let store = &*self.store;
        self.with_retry("find", move || store.find(filter)).await
    }

    pub async fn bulk_upsert(
        &self,
        operations: &[UpsertOperation],
    ) -> Result<BulkWriteOutcome, StoreError> {
        if operations.is_empty() {
            return Ok(BulkWriteOutcome::default());
        }
        let store = &*self.store;
        self.with_retry("bulk_upsert", move || store.bulk_upsert(operations))
            .await
    }

    pub async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<DailyTotals>, StoreError> {
        let store = &*self.store;
        self.with_retry("aggregate", move || store.aggregate(query)).await
    }
}
