//! PostgreSQL implementation of [`AggregationStore`]
//!
//! A bulk upsert is one transaction with `synchronous_commit` off. Inside it,
//! every chunk is a multi-row `INSERT ... ON CONFLICT (composite_key) DO
//! UPDATE` under its own savepoint, so a rejected chunk can be replayed row by
//! row while a transient failure rolls the whole bulk back and a retry starts
//! from the same state. `RETURNING (xmax = 0)` tells inserted rows apart from
//! overwritten ones.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use perfsync_common::types::report_date::midnight_utc;
use perfsync_common::types::{AggregationRecord, PerformanceMetrics};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    validate_record, AggregateQuery, AggregationStore, BulkWriteOutcome, DailyTotals,
    FailedUpsert, RecordFilter, StoreError, UpsertOperation,
};
use crate::config::DatabaseConfig;

/// Rows per multi-row upsert statement
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 500;

const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

const COLUMNS: &str = "composite_key, pt, pv, st, sv, date, ts, zone_id, campaign_id, \
                       campaign_name, clicks, conversions, cost, profit, revenue, cpc, epc, cr, roi";

pub struct PgAggregationStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgAggregationStore {
    /// Build a lazily connecting pool. No connection is attempted here, so an
    /// unreachable database surfaces through the gateway's liveness wait.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_lazy(&config.url)?;

        info!(
            max_connections = config.max_connections,
            chunk_size = config.write_chunk_size,
            "Database pool configured"
        );

        Ok(Self::from_pool(pool).with_chunk_size(config.write_chunk_size))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations applied");
        Ok(())
    }

    async fn write_chunk(
        conn: &mut PgConnection,
        chunk: &[&UpsertOperation],
    ) -> Result<BulkWriteOutcome, sqlx::Error> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO performance_aggregations ({}) ", COLUMNS));

        query_builder.push_values(chunk.iter(), |mut b, op| {
            let r = &op.record;
            let m = &r.metrics;
            b.push_bind(&r.composite_key)
                .push_bind(&r.pt)
                .push_bind(&r.pv)
                .push_bind(&r.st)
                .push_bind(&r.sv)
                .push_bind(r.date)
                .push_bind(&r.ts)
                .push_bind(&r.zone_id)
                .push_bind(&r.campaign_id)
                .push_bind(&r.campaign_name)
                .push_bind(m.clicks)
                .push_bind(m.conversions)
                .push_bind(m.cost)
                .push_bind(m.profit)
                .push_bind(m.revenue)
                .push_bind(m.cpc)
                .push_bind(m.epc)
                .push_bind(m.cr)
                .push_bind(m.roi);
        });

        query_builder.push(
            r#"
            ON CONFLICT (composite_key) DO UPDATE SET
                pt = EXCLUDED.pt,
                pv = EXCLUDED.pv,
                st = EXCLUDED.st,
                sv = EXCLUDED.sv,
                date = EXCLUDED.date,
                ts = EXCLUDED.ts,
                zone_id = EXCLUDED.zone_id,
                campaign_id = EXCLUDED.campaign_id,
                campaign_name = EXCLUDED.campaign_name,
                clicks = EXCLUDED.clicks,
                conversions = EXCLUDED.conversions,
                cost = EXCLUDED.cost,
                profit = EXCLUDED.profit,
                revenue = EXCLUDED.revenue,
                cpc = EXCLUDED.cpc,
                epc = EXCLUDED.epc,
                cr = EXCLUDED.cr,
                roi = EXCLUDED.roi,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        );

        let rows = query_builder.build().fetch_all(&mut *conn).await?;

        let mut outcome = BulkWriteOutcome::default();
        for row in rows {
            if row.try_get::<bool, _>("inserted")? {
                outcome.inserted += 1;
            } else {
                outcome.record_existing();
            }
        }
        Ok(outcome)
    }

    /// Write `chunk` under a savepoint, leaving the enclosing transaction
    /// usable when the chunk is rejected
    async fn upsert_in_savepoint(
        conn: &mut PgConnection,
        chunk: &[&UpsertOperation],
    ) -> Result<BulkWriteOutcome, sqlx::Error> {
        let mut savepoint = conn.begin().await?;

        match Self::write_chunk(&mut savepoint, chunk).await {
            Ok(written) => {
                savepoint.commit().await?;
                Ok(written)
            },
            Err(err) => {
                if let Err(rollback) = savepoint.rollback().await {
                    debug!(error = %rollback, "Savepoint rollback failed");
                }
                Err(err)
            },
        }
    }

    /// Replay a rejected chunk one row at a time to find the offending keys.
    /// A retryable error aborts the replay so the gateway can resubmit.
    async fn isolate_failures(
        conn: &mut PgConnection,
        chunk: &[&UpsertOperation],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let mut outcome = BulkWriteOutcome::default();

        for op in chunk {
            match Self::upsert_in_savepoint(conn, std::slice::from_ref(op)).await {
                Ok(written) => outcome.merge(written),
                Err(err) => {
                    let err = StoreError::from(err);
                    if err.is_retryable() {
                        return Err(err);
                    }
                    outcome.failures.push(FailedUpsert {
                        key: op.key().to_string(),
                        error: err.to_string(),
                    });
                },
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl AggregationStore for PgAggregationStore {
    async fn is_connected(&self) -> bool {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(LIVENESS_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!(error = %err, "Liveness probe failed");
                false
            },
            Err(_) => {
                debug!("Liveness probe timed out");
                false
            },
        }
    }

    async fn find(&self, filter: &RecordFilter) -> Result<Vec<AggregationRecord>, StoreError> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM performance_aggregations WHERE TRUE",
            COLUMNS
        ));

        if let Some(from) = filter.date_from {
            query_builder.push(" AND date >= ").push_bind(midnight_utc(from));
        }
        if let Some(to) = filter.date_to {
            query_builder.push(" AND date <= ").push_bind(midnight_utc(to));
        }
        if let Some(pt) = &filter.pt {
            query_builder.push(" AND pt = ").push_bind(pt);
        }
        if let Some(st) = &filter.st {
            query_builder.push(" AND st = ").push_bind(st);
        }
        query_builder
            .push(" ORDER BY date, composite_key LIMIT ")
            .push_bind(filter.limit.max(0));

        let rows: Vec<AggregationRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(AggregationRecord::from).collect())
    }

    async fn bulk_upsert(
        &self,
        operations: &[UpsertOperation],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let mut outcome = BulkWriteOutcome::default();
        let mut valid = Vec::with_capacity(operations.len());

        for op in operations {
            match validate_record(&op.record) {
                Ok(()) => valid.push(op),
                Err(reason) => outcome.failures.push(FailedUpsert {
                    key: op.key().to_string(),
                    error: reason,
                }),
            }
        }

        if valid.is_empty() {
            return Ok(outcome);
        }

        // Dropping `tx` on an early return rolls back every chunk
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL synchronous_commit TO OFF")
            .execute(&mut *tx)
            .await?;

        for chunk in valid.chunks(self.chunk_size) {
            match Self::upsert_in_savepoint(&mut tx, chunk).await {
                Ok(written) => outcome.merge(written),
                Err(err) => {
                    let err = StoreError::from(err);
                    if err.is_retryable() {
                        return Err(err);
                    }
                    warn!(rows = chunk.len(), error = %err, "Chunk rejected; replaying row by row");
                    outcome.merge(Self::isolate_failures(&mut tx, chunk).await?);
                },
            }
        }

        tx.commit().await?;

        debug!(
            inserted = outcome.inserted,
            modified = outcome.modified,
            failed = outcome.failures.len(),
            "Bulk upsert finished"
        );

        Ok(outcome)
    }

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<DailyTotals>, StoreError> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT
                (date AT TIME ZONE 'UTC')::date AS day,
                st,
                COUNT(*) AS records,
                COALESCE(SUM(clicks), 0)::BIGINT AS clicks,
                COALESCE(SUM(conversions), 0)::BIGINT AS conversions,
                COALESCE(SUM(cost), 0)::DOUBLE PRECISION AS cost,
                COALESCE(SUM(profit), 0)::DOUBLE PRECISION AS profit,
                COALESCE(SUM(revenue), 0)::DOUBLE PRECISION AS revenue
            FROM performance_aggregations
            WHERE date >= "#,
        );
        query_builder
            .push_bind(midnight_utc(query.date_from))
            .push(" AND date <= ")
            .push_bind(midnight_utc(query.date_to));

        if let Some(st) = &query.st {
            query_builder.push(" AND st = ").push_bind(st);
        }
        query_builder.push(" GROUP BY day, st ORDER BY day, st");

        let rows: Vec<TotalsRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(DailyTotals::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct AggregationRow {
    composite_key: String,
    pt: String,
    pv: String,
    st: String,
    sv: String,
    date: DateTime<Utc>,
    ts: Vec<i64>,
    zone_id: Option<String>,
    campaign_id: Option<String>,
    campaign_name: Option<String>,
    clicks: i64,
    conversions: i64,
    cost: f64,
    profit: f64,
    revenue: f64,
    cpc: f64,
    epc: f64,
    cr: f64,
    roi: f64,
}

impl From<AggregationRow> for AggregationRecord {
    fn from(row: AggregationRow) -> Self {
        Self {
            composite_key: row.composite_key,
            pt: row.pt,
            pv: row.pv,
            st: row.st,
            sv: row.sv,
            date: row.date,
            ts: row.ts,
            zone_id: row.zone_id,
            campaign_id: row.campaign_id,
            campaign_name: row.campaign_name,
            metrics: PerformanceMetrics {
                clicks: row.clicks,
                conversions: row.conversions,
                cost: row.cost,
                profit: row.profit,
                revenue: row.revenue,
                cpc: row.cpc,
                epc: row.epc,
                cr: row.cr,
                roi: row.roi,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct TotalsRow {
    day: NaiveDate,
    st: String,
    records: i64,
    clicks: i64,
    conversions: i64,
    cost: f64,
    profit: f64,
    revenue: f64,
}

impl From<TotalsRow> for DailyTotals {
    fn from(row: TotalsRow) -> Self {
        Self {
            date: row.day,
            st: row.st,
            records: row.records,
            metrics: PerformanceMetrics::from_counters(
                row.clicks,
                row.conversions,
                row.cost,
                row.profit,
                row.revenue,
            ),
        }
    }
}
