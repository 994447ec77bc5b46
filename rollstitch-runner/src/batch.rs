//! In-memory batch build for files that fit in RAM.
//!
//! Malformed rows are skipped and counted instead of aborting. Bars are
//! canonicalised (sorted, repeated rows dropped keeping the last), then the
//! rollovers are priced in parallel over the sorted slice. Dominance and
//! adjustment run through the same code as the streaming build.

use std::time::Instant;

use rayon::prelude::*;

use rollstitch_core::data::{
    BarSource, Canonicalizer, CsvBarFile, InMemoryBars, ReadMode, ScanStats,
};
use rollstitch_core::domain::{RolloverEvent, RolloverLog};
use rollstitch_core::roll::compute_spread;

use crate::config::BuildConfig;
use crate::pipeline::{
    detect, finish_build, resolve_dominance, BuildOptions, BuildPaths, PipelineError, Prepared,
};
use crate::report::{BuildMode, BuildReport, LoadSummary};
use crate::rollover_log;

pub fn run_build_in_memory(
    config: &BuildConfig,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<BuildReport, PipelineError> {
    let started = Instant::now();
    config.validate()?;

    let file = CsvBarFile::new(&paths.source)
        .with_range(options.range.clone())
        .with_mode(ReadMode::Lenient);
    let stats = ScanStats::new();
    let raw = file.read_all(&stats)?;
    let read = stats.snapshot();
    if read.malformed > 0 {
        tracing::warn!(skipped = read.malformed, "malformed rows skipped");
    }

    let (bars, canonicalize) = Canonicalizer::canonicalize(raw);
    let insane_bars = Canonicalizer::count_insane(&bars);
    if insane_bars > 0 {
        tracing::warn!(count = insane_bars, "bars fail the OHLC sanity check");
    }
    tracing::info!(
        bars = bars.len(),
        duplicates_dropped = canonicalize.duplicates_dropped,
        was_sorted = canonicalize.was_sorted,
        "source loaded into memory"
    );
    let source = InMemoryBars::new(bars);
    tracing::info!(source = %source.describe(), "in-memory build");

    let dominance = resolve_dominance(&source, config, &paths.source)?;
    let events = detect(&dominance.map, config);

    let window = config.spread_window();
    let bars = source.bars();
    let priced: Vec<RolloverEvent> = events
        .par_iter()
        .map(|event| compute_spread(bars, event, window))
        .collect::<Result<_, _>>()?;
    let log = RolloverLog::new(priced)?;
    rollover_log::write(&paths.rollover_log, &log)?;

    let prepared = Prepared {
        mode: BuildMode::InMemory,
        dominance,
        log,
        spread_scan: None,
        load: Some(LoadSummary {
            read,
            canonicalize,
            insane_bars,
        }),
        started,
    };
    finish_build(&source, prepared, config, paths, options)
}

