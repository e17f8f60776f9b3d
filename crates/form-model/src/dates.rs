//! Fuzzy dates and instants.
//!
//! Clinical records store dates either as "fuzzy" decimal numbers
//! (`YYYYMMDD` or `YYYYMMDDhhmmss`, where unknown month/day are `00`) or as
//! epoch milliseconds.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

const DATE_ONLY_RANGE: std::ops::Range<i64> = 10_000_000..100_000_000;
const DATE_TIME_RANGE: std::ops::Range<i64> = 10_000_000_000_000..100_000_000_000_000;

/// Milliseconds since the epoch, now.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn datetime_to_fuzzy(value: &NaiveDateTime) -> i64 {
    i64::from(value.year()) * 10_000_000_000
        + i64::from(value.month()) * 100_000_000
        + i64::from(value.day()) * 1_000_000
        + i64::from(value.hour()) * 10_000
        + i64::from(value.minute()) * 100
        + i64::from(value.second())
}

pub fn fuzzy_to_datetime(value: i64) -> Option<NaiveDateTime> {
    let (date, time) = if DATE_ONLY_RANGE.contains(&value) {
        (value, 0)
    } else if DATE_TIME_RANGE.contains(&value) {
        (value / 1_000_000, value % 1_000_000)
    } else {
        return None;
    };
    let year = i32::try_from(date / 10_000).ok()?;
    let month = u32::try_from((date / 100) % 100).ok()?.max(1);
    let day = u32::try_from(date % 100).ok()?.max(1);
    let hour = u32::try_from(time / 10_000).ok()?;
    let minute = u32::try_from((time / 100) % 100).ok()?;
    let second = u32::try_from(time % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Interprets a value as a fuzzy date first, then as epoch milliseconds.
pub fn any_date_to_datetime(value: i64) -> Option<NaiveDateTime> {
    fuzzy_to_datetime(value)
        .or_else(|| DateTime::from_timestamp_millis(value).map(|instant| instant.naive_utc()))
}

pub fn any_date_to_millis(value: i64) -> Option<i64> {
    any_date_to_datetime(value).map(|dt| dt.and_utc().timestamp_millis())
}

pub fn format_date(value: i64) -> Option<String> {
    any_date_to_datetime(value).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
