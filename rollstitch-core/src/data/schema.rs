//! Column layout of bar files and timestamp text conventions.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use csv::StringRecord;
use thiserror::Error;

/// Expected schema for raw multi-contract bar data.
pub struct BarSchema;

impl BarSchema {
    pub const TIMESTAMP: &'static str = "ts_event";
    pub const OPEN: &'static str = "open";
    pub const HIGH: &'static str = "high";
    pub const LOW: &'static str = "low";
    pub const CLOSE: &'static str = "close";
    pub const VOLUME: &'static str = "volume";
    pub const SYMBOL: &'static str = "symbol";
    /// Original contract column carried on continuous output.
    pub const CONTRACT: &'static str = "contract";

    /// Columns every bar file must carry (any order, extras ignored).
    pub fn required_columns() -> [&'static str; 7] {
        [
            Self::TIMESTAMP,
            Self::OPEN,
            Self::HIGH,
            Self::LOW,
            Self::CLOSE,
            Self::VOLUME,
            Self::SYMBOL,
        ]
    }

    /// Header written on raw bar files (aggregate and synth output).
    pub fn bar_header() -> [&'static str; 7] {
        Self::required_columns()
    }

    /// Header written on continuous-series files.
    pub fn continuous_header() -> [&'static str; 8] {
        [
            Self::TIMESTAMP,
            Self::OPEN,
            Self::HIGH,
            Self::LOW,
            Self::CLOSE,
            Self::VOLUME,
            Self::SYMBOL,
            Self::CONTRACT,
        ]
    }

    /// Locate the required columns in a header row.
    pub fn locate(header: &StringRecord) -> Result<BarColumns, SchemaError> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
        };
        Ok(BarColumns {
            timestamp: find(Self::TIMESTAMP)?,
            open: find(Self::OPEN)?,
            high: find(Self::HIGH)?,
            low: find(Self::LOW)?,
            close: find(Self::CLOSE)?,
            volume: find(Self::VOLUME)?,
            symbol: find(Self::SYMBOL)?,
        })
    }
}

/// Positions of the required columns within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarColumns {
    pub timestamp: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: usize,
    pub symbol: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

/// Parse a bar timestamp.
///
/// Accepts RFC 3339 with any fraction (`2021-01-26T00:00:00.000000000Z`)
/// and `YYYY-MM-DD HH:MM:SS` with or without a trailing UTC offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Fixed-width UTC timestamp text with nanosecond precision.
///
/// Fixed width keeps the text lexicographically ordered, which the range
/// filter relies on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
