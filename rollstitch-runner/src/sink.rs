//! CSV output with atomic replacement.
//!
//! Every output is written to `<path>.tmp` and renamed into place only when
//! the writer is finished. A writer dropped before `finish` removes its temp
//! file, so a failed run never leaves a partial output behind.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use thiserror::Error;

use rollstitch_core::data::{format_timestamp, BarSchema};
use rollstitch_core::domain::{Bar, ContinuousBar};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}

/// A temp file that becomes `dest` on commit and disappears otherwise.
#[derive(Debug)]
pub struct PendingFile {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PendingFile {
    pub fn new(dest: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut tmp: OsString = dest.as_os_str().to_owned();
        tmp.push(".tmp");
        Ok(Self {
            tmp: PathBuf::from(tmp),
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Rename the temp file into place.
    pub fn commit(mut self) -> Result<(), SinkError> {
        fs::rename(&self.tmp, &self.dest).map_err(|source| SinkError::Io {
            path: self.dest.clone(),
            source,
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write a complete byte buffer atomically.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let pending = PendingFile::new(dest)?;
    fs::write(pending.tmp_path(), bytes).map_err(|source| SinkError::Io {
        path: pending.tmp_path().to_path_buf(),
        source,
    })?;
    pending.commit()
}

/// Row-at-a-time CSV writer behind a [`PendingFile`].
pub struct CsvSink {
    writer: csv::Writer<File>,
    pending: PendingFile,
    rows: u64,
}

impl CsvSink {
    pub fn create<I, T>(dest: &Path, header: I) -> Result<Self, SinkError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let pending = PendingFile::new(dest)?;
        let mut writer = csv::Writer::from_path(pending.tmp_path())?;
        writer.write_record(header)?;
        Ok(Self {
            writer,
            pending,
            rows: 0,
        })
    }

    pub fn write_fields<I, T>(&mut self, fields: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(fields)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn dest(&self) -> &Path {
        self.pending.dest()
    }

    /// Flush and move the file into place. Returns rows written.
    pub fn finish(self) -> Result<u64, SinkError> {
        let CsvSink {
            mut writer,
            pending,
            rows,
        } = self;
        writer.flush().map_err(|source| SinkError::Io {
            path: pending.tmp_path().to_path_buf(),
            source,
        })?;
        drop(writer);
        pending.commit()?;
        Ok(rows)
    }
}

/// Price text: fixed decimals when given, otherwise the shortest text that
/// parses back to the same `f64`.
pub fn format_price(value: f64, decimals: Option<usize>) -> String {
    match decimals {
        Some(d) => format!("{value:.d$}"),
        None => value.to_string(),
    }
}

/// Writer for the continuous series.
pub struct ContinuousWriter {
    sink: CsvSink,
    decimals: Option<usize>,
}

impl ContinuousWriter {
    pub fn create(dest: &Path, decimals: Option<usize>) -> Result<Self, SinkError> {
        Ok(Self {
            sink: CsvSink::create(dest, BarSchema::continuous_header())?,
            decimals,
        })
    }

    pub fn write(&mut self, bar: &ContinuousBar) -> Result<(), SinkError> {
        let d = self.decimals;
        self.sink.write_fields([
            format_timestamp(&bar.timestamp),
            format_price(bar.open, d),
            format_price(bar.high, d),
            format_price(bar.low, d),
            format_price(bar.close, d),
            bar.volume.to_string(),
            bar.symbol.to_string(),
            bar.contract.clone(),
        ])
    }

    pub fn rows(&self) -> u64 {
        self.sink.rows()
    }

    pub fn finish(self) -> Result<u64, SinkError> {
        self.sink.finish()
    }
}

/// Writer for raw multi-contract bars in the reader's format.
pub struct BarWriter {
    sink: CsvSink,
}

impl BarWriter {
    pub fn create(dest: &Path) -> Result<Self, SinkError> {
        Ok(Self {
            sink: CsvSink::create(dest, BarSchema::bar_header())?,
        })
    }

    pub fn write(&mut self, bar: &Bar) -> Result<(), SinkError> {
        self.sink.write_fields([
            format_timestamp(&bar.timestamp),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
            bar.contract.clone(),
        ])
    }

    pub fn rows(&self) -> u64 {
        self.sink.rows()
    }

    pub fn finish(self) -> Result<u64, SinkError> {
        self.sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar() -> ContinuousBar {
        ContinuousBar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 14, 0, 1, 0).unwrap(),
            open: 5100.25,
            high: 5101.0,
            low: 5099.5,
            close: 5100.75,
            volume: 42.0,
            symbol: "ES_continuous",
            contract: "ESM4".into(),
        }
    }

    #[test]
    fn continuous_rows_are_committed_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out").join("ES_ohlcv_1m_continuous.csv");
        let mut writer = ContinuousWriter::create(&dest, Some(2)).unwrap();
        writer.write(&bar()).unwrap();
        assert!(!dest.exists());
        assert_eq!(writer.finish().unwrap(), 1);

        let text = std::fs::read_to_string(&dest).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ts_event,open,high,low,close,volume,symbol,contract");
        assert_eq!(
            lines[1],
            "2024-03-14T00:01:00.000000000Z,5100.25,5101.00,5099.50,5100.75,42,ES_continuous,ESM4"
        );
        assert!(!dir.path().join("out").join("ES_ohlcv_1m_continuous.csv.tmp").exists());
    }

    #[test]
    fn dropped_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.csv");
        {
            let mut writer = ContinuousWriter::create(&dest, None).unwrap();
            writer.write(&bar()).unwrap();
        }
        assert!(!dest.exists());
        assert!(!dir.path().join("partial.csv.tmp").exists());
    }

    #[test]
    fn atomic_bytes_replace_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("log.csv");
        std::fs::write(&dest, "old").unwrap();
        write_atomic(&dest, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn price_formatting() {
        assert_eq!(format_price(4798.0, Some(9)), "4798.000000000");
        assert_eq!(format_price(-2.5, Some(2)), "-2.50");
        assert_eq!(format_price(4798.0, None), "4798");
    }

    #[test]
    fn shortest_price_text_round_trips() {
        let adjusted = 4802.95 - 0.1;
        let text = format_price(adjusted, None);
        assert_eq!(text.parse::<f64>().unwrap().to_bits(), adjusted.to_bits());
        let rounded: f64 = format_price(adjusted, Some(9)).parse().unwrap();
        assert_ne!(rounded.to_bits(), adjusted.to_bits());
    }
}
