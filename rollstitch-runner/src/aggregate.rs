//! Second-to-minute aggregation of a raw bar file.

use std::path::Path;
use std::time::Instant;

use rollstitch_core::data::{BarSource, CsvBarFile, MinuteAggregator, ScanStats, TimeRange};

use crate::pipeline::{PipelineError, Progress};
use crate::report::{AggregateReport, REPORT_SCHEMA_VERSION};
use crate::sink::BarWriter;

/// Stream `input`, merge rows into minute bars and write them to `output`.
///
/// Spread rows and rows outside `range` are skipped by the reader; a
/// malformed row aborts the run and leaves no output.
pub fn run_aggregate(
    input: &Path,
    output: &Path,
    range: &TimeRange,
) -> Result<AggregateReport, PipelineError> {
    let started = Instant::now();
    let source = CsvBarFile::new(input).with_range(range.clone());
    tracing::info!(input = %source.describe(), output = %output.display(), "aggregating to minute bars");

    let stats = ScanStats::new();
    let mut bars = MinuteAggregator::new(source.scan(&stats)?);
    let mut writer = BarWriter::create(output)?;
    let mut progress = Progress::new("aggregate");

    for bar in bars.by_ref() {
        writer.write(&bar?)?;
        progress.tick(stats.rows_read(), writer.rows());
    }
    let merged_rows = bars.merged_rows();
    let bars_written = writer.finish()?;
    let scan = stats.snapshot();
    progress.done(scan.rows_read, bars_written);
    if bars_written == 0 {
        tracing::warn!(input = %input.display(), "no bars aggregated");
    }

    Ok(AggregateReport {
        schema_version: REPORT_SCHEMA_VERSION,
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        scan,
        merged_rows,
        bars_written,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}
