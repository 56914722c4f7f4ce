//! Domain types shared by the fetch and persistence layers

pub mod report_date;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw counters plus the ratios derived from them.
///
/// The ratios are never authoritative: they are recomputed from the counters
/// whenever a record is normalized or aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub clicks: i64,
    pub conversions: i64,
    pub cost: f64,
    pub profit: f64,
    pub revenue: f64,
    /// Cost per click
    pub cpc: f64,
    /// Earnings per click
    pub epc: f64,
    /// Conversion rate, percent
    pub cr: f64,
    /// Return on investment, percent
    pub roi: f64,
}

impl PerformanceMetrics {
    /// Build metrics from raw counters and derive the ratios
    pub fn from_counters(clicks: i64, conversions: i64, cost: f64, profit: f64, revenue: f64) -> Self {
        let mut metrics = Self {
            clicks,
            conversions,
            cost,
            profit,
            revenue,
            ..Self::default()
        };
        metrics.recompute_ratios();
        metrics
    }

    pub fn recompute_ratios(&mut self) {
        let clicks = self.clicks as f64;
        self.cpc = ratio(self.cost, clicks);
        self.epc = ratio(self.revenue, clicks);
        self.cr = ratio(self.conversions as f64, clicks) * 100.0;
        self.roi = ratio(self.profit, self.cost) * 100.0;
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// One persisted daily aggregate, identified by `composite_key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub composite_key: String,
    /// Platform type
    pub pt: String,
    /// Platform variant
    pub pv: String,
    /// Sub type
    pub st: String,
    /// Sub variant
    pub sv: String,
    /// Report day at UTC midnight
    pub date: DateTime<Utc>,
    /// Traffic-source ids, sorted ascending
    pub ts: Vec<i64>,
    pub zone_id: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_from_counters() {
        let m = PerformanceMetrics::from_counters(200, 10, 50.0, 25.0, 75.0);
        assert_eq!(m.cpc, 0.25);
        assert_eq!(m.epc, 0.375);
        assert_eq!(m.cr, 5.0);
        assert_eq!(m.roi, 50.0);
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        let m = PerformanceMetrics::from_counters(0, 0, 0.0, 0.0, 12.0);
        assert_eq!(m.cpc, 0.0);
        assert_eq!(m.epc, 0.0);
        assert_eq!(m.cr, 0.0);
        assert_eq!(m.roi, 0.0);
    }
}
