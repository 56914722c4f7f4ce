//! Canonical form and composite key of a performance record

use chrono::NaiveDate;
use perfsync_common::types::report_date::{iso_midnight, midnight_utc, parse_report_date};
use perfsync_common::types::{AggregationRecord, PerformanceMetrics};

use crate::fetcher::RawPerformanceRecord;

const MISSING: &str = "null";

/// `pt|pv|st|sv|ISO-date|sorted-ts|zone-or-null|campaign-or-null`
///
/// `ts` must already be sorted; see [`canonical_ts`].
#[allow(clippy::too_many_arguments)]
pub fn composite_key(
    pt: &str,
    pv: &str,
    st: &str,
    sv: &str,
    date: NaiveDate,
    ts: &[i64],
    zone_id: Option<&str>,
    campaign_id: Option<&str>,
) -> String {
    let date = iso_midnight(date);
    let ts = ts.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    [
        pt,
        pv,
        st,
        sv,
        date.as_str(),
        ts.as_str(),
        zone_id.unwrap_or(MISSING),
        campaign_id.unwrap_or(MISSING),
    ]
    .join("|")
}

/// Traffic-source ids as a set: ascending, no repeats
pub fn canonical_ts(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Normalize a fetched record. A missing or unparseable date falls back to
/// the day being synced.
pub fn normalize(raw: &RawPerformanceRecord, report_date: NaiveDate) -> AggregationRecord {
    let date = raw
        .date
        .as_deref()
        .and_then(|value| parse_report_date(value).ok())
        .unwrap_or(report_date);
    let ts = canonical_ts(&raw.traffic_source_ids);
    let zone_id = present(&raw.zone_id);
    let campaign_id = present(&raw.campaign_id);

    let composite_key = composite_key(
        &raw.platform,
        &raw.platform_variant,
        &raw.sub_type,
        &raw.sub_variant,
        date,
        &ts,
        zone_id.as_deref(),
        campaign_id.as_deref(),
    );

    AggregationRecord {
        composite_key,
        pt: raw.platform.clone(),
        pv: raw.platform_variant.clone(),
        st: raw.sub_type.clone(),
        sv: raw.sub_variant.clone(),
        date: midnight_utc(date),
        ts,
        zone_id,
        campaign_id,
        campaign_name: present(&raw.campaign_name),
        metrics: PerformanceMetrics::from_counters(
            raw.clicks,
            raw.conversions,
            raw.cost,
            raw.profit,
            raw.revenue,
        ),
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
