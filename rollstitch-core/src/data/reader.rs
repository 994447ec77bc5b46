//! Streaming bar source reader.
//!
//! Yields time-ordered bars from a multi-contract CSV file without loading it
//! into memory. Calendar-spread rows and rows outside the requested date
//! range are skipped before any numeric parsing. Every call to
//! [`BarSource::scan`] restarts from the top of the file, which is what the
//! two-pass build needs.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schema::{parse_timestamp, BarColumns, BarSchema, SchemaError};
use crate::domain::{is_calendar_spread, Bar};

#[derive(Debug, Error)]
pub enum SourceReadError {
    #[error("source file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid header: {0}")]
    Schema(#[from] SchemaError),

    #[error("malformed row at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("read error: {0}")]
    Csv(#[from] csv::Error),
}

/// How to treat structurally malformed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Malformed rows abort the scan (streaming build).
    #[default]
    Strict,
    /// Malformed rows are skipped and counted (in-memory batch).
    Lenient,
}

/// Inclusive date range applied to the raw timestamp text.
///
/// ISO-8601 timestamps are fixed width, so comparing the text against
/// `"YYYY-MM-DD"` and `"YYYY-MM-DDT99"` selects whole days without parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_key: Option<String>,
    pub end_key: Option<String>,
}

impl TimeRange {
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start_key: start.map(|d| d.format("%Y-%m-%d").to_string()),
            // "T99" sorts after any time of day in either separator style.
            end_key: end.map(|d| format!("{}T99", d.format("%Y-%m-%d"))),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, raw_ts: &str) -> bool {
        if let Some(start) = &self.start_key {
            if raw_ts < start.as_str() {
                return false;
            }
        }
        if let Some(end) = &self.end_key {
            if raw_ts > end.as_str() {
                return false;
            }
        }
        true
    }
}

/// Monotonic row counters for one scan.
#[derive(Debug, Default)]
pub struct ScanStats {
    rows_read: AtomicU64,
    spread_rows: AtomicU64,
    out_of_range: AtomicU64,
    malformed: AtomicU64,
    bars_yielded: AtomicU64,
}

/// Plain snapshot of [`ScanStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounts {
    pub rows_read: u64,
    pub spread_rows: u64,
    pub out_of_range: u64,
    pub malformed: u64,
    pub bars_yielded: u64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ScanCounts {
        ScanCounts {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            spread_rows: self.spread_rows.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            bars_yielded: self.bars_yielded.load(Ordering::Relaxed),
        }
    }
}

/// Boxed bar stream returned by a [`BarSource`].
pub type BarIter<'a> = Box<dyn Iterator<Item = Result<Bar, SourceReadError>> + 'a>;

/// A restartable, time-ordered sequence of outright bars.
pub trait BarSource {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Start a fresh pass over the source, counting into `stats`.
    fn scan<'a>(&'a self, stats: &'a ScanStats) -> Result<BarIter<'a>, SourceReadError>;
}

/// Bar file on disk.
#[derive(Debug, Clone)]
pub struct CsvBarFile {
    path: PathBuf,
    range: TimeRange,
    mode: ReadMode,
}

impl CsvBarFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            range: TimeRange::unbounded(),
            mode: ReadMode::Strict,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every retained bar into memory.
    pub fn read_all(&self, stats: &ScanStats) -> Result<Vec<Bar>, SourceReadError> {
        self.scan(stats)?.collect()
    }
}

impl BarSource for CsvBarFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn scan<'a>(&'a self, stats: &'a ScanStats) -> Result<BarIter<'a>, SourceReadError> {
        if !self.path.exists() {
            return Err(SourceReadError::Missing(self.path.clone()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(&self.path)
            .map_err(|source| SourceReadError::Open {
                path: self.path.clone(),
                source,
            })?;
        let columns = BarSchema::locate(reader.headers()?)?;
        Ok(Box::new(CsvBarIter {
            reader,
            record: StringRecord::new(),
            columns,
            range: &self.range,
            mode: self.mode,
            stats,
            done: false,
        }))
    }
}

struct CsvBarIter<'a> {
    reader: csv::Reader<File>,
    record: StringRecord,
    columns: BarColumns,
    range: &'a TimeRange,
    mode: ReadMode,
    stats: &'a ScanStats,
    done: bool,
}

impl CsvBarIter<'_> {
    /// Either skip-and-count or abort, depending on the read mode.
    fn reject(&mut self, line: u64, reason: String) -> Option<Result<Bar, SourceReadError>> {
        match self.mode {
            ReadMode::Lenient => {
                ScanStats::bump(&self.stats.malformed);
                tracing::debug!(line, %reason, "skipping malformed row");
                None
            }
            ReadMode::Strict => {
                self.done = true;
                Some(Err(SourceReadError::Malformed { line, reason }))
            }
        }
    }
}

impl Iterator for CsvBarIter<'_> {
    type Item = Result<Bar, SourceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Ok(true) => {}
                Err(err) => {
                    ScanStats::bump(&self.stats.rows_read);
                    let line = err.position().map(|p| p.line()).unwrap_or(0);
                    match err.kind() {
                        csv::ErrorKind::UnequalLengths { expected_len, len, .. } => {
                            let reason = format!("expected {expected_len} columns, found {len}");
                            if let Some(out) = self.reject(line, reason) {
                                return Some(out);
                            }
                            continue;
                        }
                        csv::ErrorKind::Utf8 { .. } => {
                            if let Some(out) = self.reject(line, "invalid UTF-8".into()) {
                                return Some(out);
                            }
                            continue;
                        }
                        _ => {
                            self.done = true;
                            return Some(Err(SourceReadError::Csv(err)));
                        }
                    }
                }
            }

            ScanStats::bump(&self.stats.rows_read);
            let line = self.record.position().map(|p| p.line()).unwrap_or(0);

            if is_calendar_spread(&self.record[self.columns.symbol]) {
                ScanStats::bump(&self.stats.spread_rows);
                continue;
            }
            if !self.range.contains(self.record[self.columns.timestamp].trim()) {
                ScanStats::bump(&self.stats.out_of_range);
                continue;
            }

            match parse_bar(&self.record, &self.columns) {
                Ok(bar) => {
                    ScanStats::bump(&self.stats.bars_yielded);
                    return Some(Ok(bar));
                }
                Err(reason) => {
                    if let Some(out) = self.reject(line, reason) {
                        return Some(out);
                    }
                }
            }
        }
        None
    }
}

fn parse_bar(record: &StringRecord, cols: &BarColumns) -> Result<Bar, String> {
    let raw_ts = &record[cols.timestamp];
    let timestamp =
        parse_timestamp(raw_ts).ok_or_else(|| format!("unparseable timestamp '{raw_ts}'"))?;
    let number = |idx: usize, name: &str| -> Result<f64, String> {
        let raw = record[idx].trim();
        raw.parse::<f64>()
            .map_err(|_| format!("column {name}: '{raw}' is not a number"))
    };
    let contract = record[cols.symbol].trim();
    if contract.is_empty() {
        return Err("empty symbol".into());
    }
    Ok(Bar {
        timestamp,
        open: number(cols.open, BarSchema::OPEN)?,
        high: number(cols.high, BarSchema::HIGH)?,
        low: number(cols.low, BarSchema::LOW)?,
        close: number(cols.close, BarSchema::CLOSE)?,
        volume: number(cols.volume, BarSchema::VOLUME)?,
        contract: contract.to_string(),
    })
}

/// Bars already held in memory, sorted by timestamp.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBars {
    bars: Vec<Bar>,
}

impl InMemoryBars {
    /// Wrap bars that the caller has already canonicalised.
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl BarSource for InMemoryBars {
    fn describe(&self) -> String {
        format!("{} in-memory bars", self.bars.len())
    }

    fn scan<'a>(&'a self, stats: &'a ScanStats) -> Result<BarIter<'a>, SourceReadError> {
        Ok(Box::new(self.bars.iter().map(move |bar| {
            ScanStats::bump(&stats.rows_read);
            ScanStats::bump(&stats.bars_yielded);
            Ok(bar.clone())
        })))
    }
}
