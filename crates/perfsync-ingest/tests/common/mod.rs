//! Shared helpers for perfsync-ingest integration tests
#![allow(dead_code)]

use chrono::NaiveDate;
use perfsync_ingest::config::ApiConfig;
use perfsync_ingest::fetcher::RawPerformanceRecord;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use wiremock::{MockServer, Request, ResponseTemplate, Respond};

pub const TEST_API_KEY: &str = "test-key";

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,perfsync_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        api_key: TEST_API_KEY.to_string(),
        traffic_source_ids: vec![300, 404],
        ..ApiConfig::default()
    }
}

/// A raw record with the given sub variant and traffic sources
pub fn raw(sv: &str, ts: &[i64], clicks: i64) -> RawPerformanceRecord {
    RawPerformanceRecord {
        platform: "push".into(),
        platform_variant: "classic".into(),
        sub_type: "subid".into(),
        sub_variant: sv.into(),
        date: Some("2024-01-15".into()),
        clicks,
        conversions: 1,
        cost: 2.0,
        profit: 1.0,
        revenue: 3.0,
        traffic_source_ids: ts.to_vec(),
        ..RawPerformanceRecord::default()
    }
}

/// Serves a report of `total` numbered records, honouring `offset`/`limit`.
///
/// Each record's `sv` is its position in the report and its `st` is the
/// requested grouping, so ordering and per-report separation can be checked.
pub struct PagedReport {
    total: u64,
    failing: HashSet<u64>,
    stagger: Duration,
}

impl PagedReport {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            failing: HashSet::new(),
            stagger: Duration::ZERO,
        }
    }

    /// Answer with HTTP 500 for the page at `offset`
    pub fn failing_at(mut self, offset: u64) -> Self {
        self.failing.insert(offset);
        self
    }

    /// Delay earlier pages of a round more than later ones, so responses
    /// complete in reverse offset order
    pub fn staggered(mut self, step: Duration) -> Self {
        self.stagger = step;
        self
    }
}

impl Respond for PagedReport {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        let param = |name: &str| -> Vec<&str> {
            pairs
                .iter()
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .collect()
        };
        let number = |name: &str| -> u64 {
            param(name).first().and_then(|v| v.parse().ok()).unwrap_or(0)
        };

        let offset = number("offset");
        let limit = number("limit").max(1);

        if self.failing.contains(&offset) {
            return ResponseTemplate::new(500).set_body_string("upstream exploded");
        }

        let grouping = param("groupBy").join("+");
        let date = param("dateFrom").first().map(|d| d.to_string());
        let end = (offset + limit).min(self.total);

        let report: Vec<_> = (offset..end.max(offset))
            .map(|i| {
                json!({
                    "pt": "push",
                    "pv": "classic",
                    "st": grouping,
                    "sv": i.to_string(),
                    "date": date,
                    "clicks": 10,
                    "conversions": 1,
                    "cost": 2.5,
                    "profit": 1.0,
                    "revenue": 3.5,
                    "ts": [404, 300]
                })
            })
            .collect();

        let slot = (offset / limit) % 10;
        let delay = self.stagger * (10 - slot) as u32;

        ResponseTemplate::new(200)
            .set_body_json(json!({ "report": report, "totals": { "total_count": self.total } }))
            .set_delay(delay)
    }
}

/// `sv` values of fetched records, parsed back into positions
pub fn positions(records: &[RawPerformanceRecord]) -> Vec<u64> {
    records
        .iter()
        .map(|r| r.sub_variant.parse().unwrap())
        .collect()
}
