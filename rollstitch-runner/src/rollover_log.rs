//! Rollover log file: the durable hand-off between a build and any later
//! `apply` or `levels` run.
//!
//! Columns: `date,from_symbol,to_symbol,spread,overlap_bars,spread_min,spread_max`.
//! Logs carrying only the first four columns are accepted; their audit
//! fields default to zero overlap and the spread itself.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use thiserror::Error;

use rollstitch_core::data::parse_timestamp;
use rollstitch_core::domain::{RolloverEvent, RolloverLog, RolloverLogError, SpreadStats};

use crate::sink::{write_atomic, SinkError};

pub const LOG_HEADER: [&str; 7] = [
    "date",
    "from_symbol",
    "to_symbol",
    "spread",
    "overlap_bars",
    "spread_min",
    "spread_max",
];

#[derive(Debug, Error)]
pub enum RolloverFileError {
    #[error("rollover log not found: {0}")]
    Missing(PathBuf),

    #[error("rollover log CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("rollover log is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("rollover log row {row}: {reason}")]
    Malformed { row: usize, reason: String },

    #[error("rollover log is inconsistent: {0}")]
    Invalid(#[from] RolloverLogError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Log date text: plain date for midnight switches, RFC 3339 otherwise.
fn format_switch(ts: &DateTime<Utc>) -> String {
    if ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0 {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.to_rfc3339()
    }
}

fn parse_switch(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    parse_timestamp(raw)
}

/// Serialise a log to CSV bytes.
///
/// Floats use the shortest text that reads back to the same value, so a
/// log read from disk reproduces the build's adjustments exactly.
pub fn encode(log: &RolloverLog) -> Result<Vec<u8>, RolloverFileError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(LOG_HEADER)?;
    for event in log.events() {
        let stats = event
            .spread
            .ok_or_else(|| RolloverLogError::Unpriced {
                at: event.switch_ts,
                from: event.from_contract.clone(),
                to: event.to_contract.clone(),
            })?;
        wtr.write_record([
            format_switch(&event.switch_ts),
            event.from_contract.clone(),
            event.to_contract.clone(),
            stats.spread.to_string(),
            stats.overlap_bars.to_string(),
            stats.spread_min.to_string(),
            stats.spread_max.to_string(),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| RolloverFileError::Csv(e.into_error().into()))
}

/// BLAKE3 digest of the encoded log.
pub fn digest(log: &RolloverLog) -> Result<String, RolloverFileError> {
    Ok(blake3::hash(&encode(log)?).to_hex().to_string())
}

/// Write the log atomically.
pub fn write(path: &Path, log: &RolloverLog) -> Result<(), RolloverFileError> {
    let bytes = encode(log)?;
    write_atomic(path, &bytes)?;
    tracing::info!(path = %path.display(), rollovers = log.len(), "rollover log written");
    Ok(())
}

/// Parse log CSV text.
pub fn decode(text: &str) -> Result<RolloverLog, RolloverFileError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let header = rdr.headers()?.clone();
    let find = |name: &'static str| header.iter().position(|h| h.trim() == name);
    let required = |name: &'static str| find(name).ok_or(RolloverFileError::MissingColumn(name));

    let date_col = required("date")?;
    let from_col = required("from_symbol")?;
    let to_col = required("to_symbol")?;
    let spread_col = required("spread")?;
    let overlap_col = find("overlap_bars");
    let min_col = find("spread_min");
    let max_col = find("spread_max");

    let mut events = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 1;
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let malformed = |reason: String| RolloverFileError::Malformed { row, reason };
        let number = |idx: usize, name: &str| -> Result<f64, RolloverFileError> {
            field(idx)
                .parse::<f64>()
                .map_err(|_| malformed(format!("{name} '{}' is not a number", field(idx))))
        };

        let switch_ts = parse_switch(field(date_col))
            .ok_or_else(|| malformed(format!("unparseable date '{}'", field(date_col))))?;
        let spread = number(spread_col, "spread")?;
        let optional = |col: Option<usize>, name: &str, default: f64| match col {
            Some(idx) if !field(idx).is_empty() => number(idx, name),
            _ => Ok(default),
        };
        let overlap_bars = match overlap_col {
            Some(idx) if !field(idx).is_empty() => field(idx).parse::<usize>().map_err(|_| {
                malformed(format!("overlap_bars '{}' is not a count", field(idx)))
            })?,
            _ => 0,
        };
        let stats = SpreadStats {
            spread,
            overlap_bars,
            spread_min: optional(min_col, "spread_min", spread)?,
            spread_max: optional(max_col, "spread_max", spread)?,
        };
        events.push(
            RolloverEvent::new(switch_ts, field(from_col), field(to_col)).with_spread(stats),
        );
    }
    Ok(RolloverLog::new(events)?)
}

/// Read a log from disk. A missing file is an error, never an empty log.
pub fn read(path: &Path) -> Result<RolloverLog, RolloverFileError> {
    if !path.exists() {
        return Err(RolloverFileError::Missing(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let log = decode(&text)?;
    tracing::info!(path = %path.display(), rollovers = log.len(), "rollover log loaded");
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> RolloverLog {
        RolloverLog::new(vec![
            RolloverEvent::new(Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap(), "ESH4", "ESM4")
                .with_spread(SpreadStats {
                    spread: 52.25,
                    overlap_bars: 1380,
                    spread_min: 50.5,
                    spread_max: 54.0,
                }),
            RolloverEvent::new(Utc.with_ymd_and_hms(2024, 6, 13, 14, 0, 0).unwrap(), "ESM4", "ESU4")
                .with_spread(SpreadStats::fallback(0.1 + 0.2)),
        ])
        .unwrap()
    }

    #[test]
    fn encoded_log_reads_back_exactly() {
        let log = sample();
        let bytes = encode(&log).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("date,from_symbol,to_symbol,spread,overlap_bars,spread_min,spread_max\n"));
        assert!(text.contains("2024-03-14,ESH4,ESM4,52.25,1380,50.5,54\n"));
        assert!(text.contains("2024-06-13T14:00:00+00:00,ESM4,ESU4,"));

        let back = decode(&text).unwrap();
        assert_eq!(back, log);
        assert_eq!(
            back.events()[1].spread_value().unwrap().to_bits(),
            (0.1_f64 + 0.2).to_bits()
        );
    }

    #[test]
    fn four_column_log_is_accepted() {
        let log = decode("date,from_symbol,to_symbol,spread\n2021-03-19,ESH1,ESM1,-3.5\n").unwrap();
        let stats = log.events()[0].spread.unwrap();
        assert_eq!(stats.spread, -3.5);
        assert_eq!(stats.overlap_bars, 0);
        assert_eq!(stats.spread_min, -3.5);
        assert_eq!(stats.spread_max, -3.5);
    }

    #[test]
    fn header_only_log_is_empty() {
        let log = decode("date,from_symbol,to_symbol,spread\n").unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn missing_column_is_reported() {
        let err = decode("date,from_symbol,spread\n2021-03-19,ESH1,1.0\n").unwrap_err();
        assert!(matches!(err, RolloverFileError::MissingColumn("to_symbol")));
    }

    #[test]
    fn bad_spread_is_malformed() {
        let err = decode("date,from_symbol,to_symbol,spread\n2021-03-19,ESH1,ESM1,abc\n").unwrap_err();
        assert!(matches!(err, RolloverFileError::Malformed { row: 1, .. }));
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let err = decode(
            "date,from_symbol,to_symbol,spread\n2021-06-18,ESM1,ESU1,1\n2021-03-19,ESH1,ESM1,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, RolloverFileError::Invalid(RolloverLogError::OutOfOrder { .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, RolloverFileError::Missing(_)));
    }

    #[test]
    fn digest_tracks_content() {
        let a = digest(&sample()).unwrap();
        assert_eq!(a, digest(&sample()).unwrap());
        assert_ne!(a, digest(&RolloverLog::default()).unwrap());
    }
}
