//! Auxiliary level-file adjustment.
//!
//! Shifts every price-level column of a timestamped CSV into the price space
//! of the continuous series, using the same rollover log and the same
//! adjustment lookup as the bar build. Values go through the same price
//! formatting as the continuous writer, so with matching `price_decimals` a
//! level equal to a raw close lands exactly on the written adjusted close.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rollstitch_core::adjust::{AdjustmentSchedule, LevelAdjuster};
use rollstitch_core::data::parse_timestamp;

use crate::pipeline::{PipelineError, Progress};
use crate::report::{LevelsReport, REPORT_SCHEMA_VERSION};
use crate::rollover_log;
use crate::sink::{format_price, CsvSink};

#[derive(Debug, Error)]
pub enum LevelFileError {
    #[error("level file not found: {0}")]
    Missing(PathBuf),

    #[error("level file CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("level file has no column '{0}'")]
    MissingColumn(String),

    #[error("level file has no numeric level columns")]
    NoLevelColumns,

    #[error("level file line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

/// Which columns of a level file hold the timestamp and the price levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFileSpec {
    pub timestamp_column: String,
    /// Explicit level columns; `None` detects them from the first row.
    pub level_columns: Option<Vec<String>>,
    /// Columns never treated as levels during detection.
    pub exclude: Vec<String>,
    /// Must match the build's `price_decimals` for exact alignment.
    pub price_decimals: Option<usize>,
}

impl Default for LevelFileSpec {
    fn default() -> Self {
        Self {
            timestamp_column: "unix_timestamp".to_string(),
            level_columns: None,
            exclude: vec!["sentiment".to_string()],
            price_decimals: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelsPaths {
    pub input: PathBuf,
    pub rollover_log: PathBuf,
    pub output: PathBuf,
}

/// Epoch milliseconds, or any timestamp text the bar reader accepts.
pub fn parse_level_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms);
    }
    parse_timestamp(raw)
}

/// Resolved column positions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LevelColumns {
    timestamp: usize,
    levels: Vec<usize>,
}

impl LevelColumns {
    fn resolve(
        spec: &LevelFileSpec,
        header: &StringRecord,
        first: Option<&StringRecord>,
    ) -> Result<Self, LevelFileError> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| LevelFileError::MissingColumn(name.to_string()))
        };
        let timestamp = find(&spec.timestamp_column)?;

        let levels = match &spec.level_columns {
            Some(names) => names.iter().map(|n| find(n)).collect::<Result<Vec<_>, _>>()?,
            None => {
                let Some(first) = first else {
                    return Ok(Self {
                        timestamp,
                        levels: Vec::new(),
                    });
                };
                header
                    .iter()
                    .enumerate()
                    .filter(|(i, name)| {
                        *i != timestamp && !spec.exclude.iter().any(|e| e == name.trim())
                    })
                    .filter(|(i, _)| {
                        first
                            .get(*i)
                            .map_or(false, |v| v.trim().parse::<f64>().is_ok())
                    })
                    .map(|(i, _)| i)
                    .collect()
            }
        };
        if levels.is_empty() && first.is_some() {
            return Err(LevelFileError::NoLevelColumns);
        }
        Ok(Self { timestamp, levels })
    }
}

/// Adjust a level file with an existing rollover log.
pub fn run_levels(spec: &LevelFileSpec, paths: &LevelsPaths) -> Result<LevelsReport, PipelineError> {
    let started = Instant::now();
    let log = rollover_log::read(&paths.rollover_log)?;
    if !paths.input.exists() {
        return Err(LevelFileError::Missing(paths.input.clone()).into());
    }
    let schedule = AdjustmentSchedule::from_log(&log);
    tracing::info!(
        input = %paths.input.display(),
        rollovers = log.len(),
        total_adjustment = schedule.total_adjustment(),
        "adjusting level file"
    );

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(&paths.input)
        .map_err(LevelFileError::from)?;
    let header = reader.headers().map_err(LevelFileError::from)?.clone();
    let mut records = reader.records();
    let first = records.next().transpose().map_err(LevelFileError::from)?;
    let columns = LevelColumns::resolve(spec, &header, first.as_ref())?;
    let level_names: Vec<String> = columns
        .levels
        .iter()
        .map(|&i| header[i].trim().to_string())
        .collect();
    tracing::info!(columns = ?level_names, "level columns");

    let mut sink = CsvSink::create(&paths.output, &header)?;
    let mut adjuster = LevelAdjuster::new(&schedule);
    let mut progress = Progress::new("levels");
    let mut rows: u64 = 0;
    let mut non_numeric_cells: u64 = 0;
    let mut values: Vec<f64> = Vec::with_capacity(columns.levels.len());
    let mut numeric: Vec<usize> = Vec::with_capacity(columns.levels.len());
    let mut fields: Vec<String> = Vec::with_capacity(header.len());

    let rest = records.map(|r| r.map_err(LevelFileError::from));
    for record in first.into_iter().map(Ok).chain(rest) {
        let record = record?;
        rows += 1;
        let line = record.position().map_or(rows + 1, |p| p.line());
        let raw_ts = record.get(columns.timestamp).unwrap_or("");
        let ts = parse_level_timestamp(raw_ts).ok_or_else(|| LevelFileError::Malformed {
            line,
            reason: format!("unparseable timestamp '{raw_ts}'"),
        })?;

        values.clear();
        numeric.clear();
        for &col in &columns.levels {
            match record.get(col).map(str::trim).and_then(|v| v.parse::<f64>().ok()) {
                Some(v) => {
                    values.push(v);
                    numeric.push(col);
                }
                None => non_numeric_cells += 1,
            }
        }
        adjuster.adjust_record(ts, &mut values);

        fields.clear();
        fields.extend(record.iter().map(str::to_string));
        for (&col, v) in numeric.iter().zip(&values) {
            fields[col] = format_price(*v, spec.price_decimals);
        }
        sink.write_fields(&fields)?;
        progress.tick(rows, rows);
    }
    let written = sink.finish()?;
    progress.done(rows, written);
    if non_numeric_cells > 0 {
        tracing::warn!(cells = non_numeric_cells, "non-numeric level cells passed through");
    }

    Ok(LevelsReport {
        schema_version: REPORT_SCHEMA_VERSION,
        input: paths.input.clone(),
        rollover_log: paths.rollover_log.clone(),
        output: paths.output.clone(),
        rollover_log_digest: rollover_log::digest(&log)?,
        rollovers: log.len(),
        total_adjustment: schedule.total_adjustment(),
        timestamp_column: spec.timestamp_column.clone(),
        level_columns: level_names,
        records: rows,
        values_adjusted: adjuster.values_adjusted(),
        non_numeric_cells,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn epoch_millis_and_text_timestamps() {
        let expected = Utc.with_ymd_and_hms(2023, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_level_timestamp("1678838400000"), Some(expected));
        assert_eq!(parse_level_timestamp("2023-03-15 00:00:00"), Some(expected));
        assert_eq!(parse_level_timestamp("soon"), None);
    }

    #[test]
    fn detection_skips_text_timestamp_and_excluded_columns() {
        let header = record(&[
            "datetime",
            "unix_timestamp",
            "sentiment",
            "level_1",
            "level_2",
        ]);
        let first = record(&["2023-03-15 00:00", "1678838400000", "1", "4010.5", "3990.25"]);
        let cols = LevelColumns::resolve(&LevelFileSpec::default(), &header, Some(&first)).unwrap();
        assert_eq!(cols.timestamp, 1);
        assert_eq!(cols.levels, vec![3, 4]);
    }

    #[test]
    fn explicit_columns_must_exist() {
        let header = record(&["unix_timestamp", "level_1"]);
        let spec = LevelFileSpec {
            level_columns: Some(vec!["level_9".into()]),
            ..LevelFileSpec::default()
        };
        let err = LevelColumns::resolve(&spec, &header, None).unwrap_err();
        assert!(matches!(err, LevelFileError::MissingColumn(c) if c == "level_9"));
    }

    #[test]
    fn file_without_numeric_columns_is_rejected() {
        let header = record(&["unix_timestamp", "note"]);
        let first = record(&["1678838400000", "hello"]);
        let err = LevelColumns::resolve(&LevelFileSpec::default(), &header, Some(&first)).unwrap_err();
        assert!(matches!(err, LevelFileError::NoLevelColumns));
    }

    #[test]
    fn missing_timestamp_column_is_reported() {
        let header = record(&["time", "level_1"]);
        let err = LevelColumns::resolve(&LevelFileSpec::default(), &header, None).unwrap_err();
        assert!(matches!(err, LevelFileError::MissingColumn(c) if c == "unix_timestamp"));
    }
}
