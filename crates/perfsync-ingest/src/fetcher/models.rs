//! Wire models for the reporting API
//!
//! The API is loosely typed: numeric ids sometimes arrive as strings and
//! metrics sometimes arrive as numeric strings, so the record fields use
//! lenient deserializers.

use chrono::NaiveDate;
use perfsync_common::types::report_date::DayWindow;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::dimensions::ReportDimensions;

/// One row of the `report` array, exactly as the API describes it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPerformanceRecord {
    #[serde(default, alias = "pt", deserialize_with = "lenient::string")]
    pub platform: String,
    #[serde(default, alias = "pv", deserialize_with = "lenient::string")]
    pub platform_variant: String,
    #[serde(default, alias = "st", deserialize_with = "lenient::string")]
    pub sub_type: String,
    #[serde(default, alias = "sv", deserialize_with = "lenient::string")]
    pub sub_variant: String,
    #[serde(default, alias = "day", deserialize_with = "lenient::opt_string")]
    pub date: Option<String>,
    #[serde(default, alias = "zone", deserialize_with = "lenient::opt_string")]
    pub zone_id: Option<String>,
    #[serde(default, alias = "campaign", deserialize_with = "lenient::opt_string")]
    pub campaign_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub campaign_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub clicks: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub conversions: i64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub cost: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub profit: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub revenue: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub cpc: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub epc: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub cr: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub roi: f64,
    #[serde(default, alias = "ts", deserialize_with = "lenient::int_list")]
    pub traffic_source_ids: Vec<i64>,
}

/// `{ "report": [...], "totals": { "total_count": N } }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportPage {
    #[serde(default)]
    pub report: Vec<RawPerformanceRecord>,
    #[serde(default)]
    pub totals: ReportTotals,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReportTotals {
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_count: u64,
}

/// Everything about a fetch that stays fixed across its pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub dimensions: ReportDimensions,
    pub date: NaiveDate,
    pub window: DayWindow,
}

impl ReportQuery {
    pub fn new(dimensions: ReportDimensions, date: NaiveDate) -> Self {
        Self {
            dimensions,
            date,
            window: DayWindow::for_date(date),
        }
    }
}

mod lenient {
    use super::*;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_string(d)?.unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<Value>::deserialize(d)?
            .as_ref()
            .and_then(as_f64)
            .unwrap_or(0.0))
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(Option::<Value>::deserialize(d)?
            .as_ref()
            .and_then(as_i64)
            .unwrap_or(0))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(int(d)?.max(0) as u64)
    }

    pub fn int_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<i64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items.iter().filter_map(as_i64).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect(),
            Some(other) => as_i64(&other).into_iter().collect(),
            None => Vec::new(),
        })
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            },
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_field_names() {
        let record: RawPerformanceRecord = serde_json::from_value(json!({
            "platform": "push",
            "platform_variant": "classic",
            "sub_type": "subid",
            "sub_variant": "abc-1",
            "date": "2024-01-15",
            "zone_id": "98765",
            "campaign_id": "c-1",
            "campaign_name": "Winter",
            "clicks": 120,
            "conversions": 6,
            "cost": 12.5,
            "profit": 7.5,
            "revenue": 20.0,
            "traffic_source_ids": [404, 300]
        }))
        .unwrap();

        assert_eq!(record.platform, "push");
        assert_eq!(record.sub_variant, "abc-1");
        assert_eq!(record.zone_id.as_deref(), Some("98765"));
        assert_eq!(record.clicks, 120);
        assert_eq!(record.traffic_source_ids, vec![404, 300]);
    }

    #[test]
    fn test_short_field_names_and_loose_types() {
        let record: RawPerformanceRecord = serde_json::from_value(json!({
            "pt": "pop",
            "pv": "",
            "st": "zone",
            "sv": 5511,
            "day": "2024-01-15 00:00:00",
            "zone": 5511,
            "campaign": null,
            "clicks": "42",
            "cost": "3.75",
            "ts": "300, 404"
        }))
        .unwrap();

        assert_eq!(record.platform, "pop");
        assert_eq!(record.sub_variant, "5511");
        assert_eq!(record.zone_id.as_deref(), Some("5511"));
        assert_eq!(record.campaign_id, None);
        assert_eq!(record.clicks, 42);
        assert_eq!(record.cost, 3.75);
        assert_eq!(record.conversions, 0);
        assert_eq!(record.traffic_source_ids, vec![300, 404]);
    }

    #[test]
    fn test_page_totals_default_to_zero() {
        let page: ReportPage = serde_json::from_value(json!({ "report": [] })).unwrap();
        assert_eq!(page.totals.total_count, 0);

        let page: ReportPage =
            serde_json::from_value(json!({ "report": [{}], "totals": { "total_count": "2500" } }))
                .unwrap();
        assert_eq!(page.totals.total_count, 2500);
        assert_eq!(page.report.len(), 1);
    }
}
