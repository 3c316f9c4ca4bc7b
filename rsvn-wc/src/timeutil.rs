//! SVN timestamp format
//!
//! Dates on disk look like `2006-01-01T12:00:00.000000Z`. Comparisons
//! against filesystem mtimes are done at one-second resolution, since
//! that is the coarsest granularity a filesystem may report.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::Result;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a timestamp in the on-disk date format.
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format(DATE_FORMAT).to_string()
}

/// Render the current time in the on-disk date format.
pub fn format_now() -> String {
    format_date(Utc::now())
}

/// Render a file mtime in the on-disk date format.
pub fn format_system_time(time: SystemTime) -> String {
    format_date(DateTime::<Utc>::from(time))
}

/// Parse an on-disk date. Returns `None` for absent or malformed text.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Epoch seconds of a parsed on-disk date, rounded down.
pub fn date_to_seconds(text: &str) -> Option<i64> {
    parse_date(text).map(|dt| dt.timestamp())
}

/// A file's mtime as whole epoch seconds.
pub fn mtime_seconds(path: &Path) -> Result<i64> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(system_time_seconds(mtime))
}

/// A file's mtime in the on-disk date format.
pub fn mtime_string(path: &Path) -> Result<String> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(format_system_time(mtime))
}

fn system_time_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
