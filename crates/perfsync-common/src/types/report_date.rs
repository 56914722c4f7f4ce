//! Calendar-date helpers for report days
//!
//! Report days are date-only values. They are stored as UTC midnight and
//! rendered into composite keys as `YYYY-MM-DDT00:00:00.000Z`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{PerfsyncError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a date as the remote API or an operator writes it, keeping only the
/// calendar date.
pub fn parse_report_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Ok(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, DATETIME_FORMAT) {
        return Ok(datetime.date());
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.with_timezone(&Utc).date_naive());
    }

    Err(PerfsyncError::InvalidDate {
        value: value.to_string(),
    })
}

/// UTC midnight of `date`
pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// ISO 8601 rendering of UTC midnight with millisecond precision
pub fn iso_midnight(date: NaiveDate) -> String {
    midnight_utc(date)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Local-time bounds covering the whole of `date`, as sent in `dateFrom`/`dateTo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayWindow {
    pub date_from: String,
    pub date_to: String,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate) -> Self {
        let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Self {
            date_from: date.and_time(NaiveTime::MIN).format(DATETIME_FORMAT).to_string(),
            date_to: date.and_time(last_second).format(DATETIME_FORMAT).to_string(),
        }
    }
}

/// Every date in `from..=to`
pub fn dates_between(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
    if from > to {
        return Err(PerfsyncError::InvalidDateRange {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    Ok(from.iter_days().take_while(|d| *d <= to).collect())
}
