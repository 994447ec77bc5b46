//! Two-pass streaming build.
//!
//! Pass 1 streams the source once and keeps only the per-bucket primary
//! contract. Rollovers are detected from that map and priced by a second
//! read-only scan. Pass 2 streams the source again, filters to the front
//! contract, shifts prices and writes the continuous series. Memory is
//! bounded by bucket count and rollover windows, never by row count.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Duration;
use thiserror::Error;

use rollstitch_core::adjust::{AdjustCounts, AdjustmentSchedule, BackAdjuster};
use rollstitch_core::data::{
    parse_timestamp, BarSchema, BarSource, CsvBarFile, ScanCounts, ScanStats, SourceReadError,
    TimeRange,
};
use rollstitch_core::domain::{Product, RolloverEvent, RolloverLog, RolloverLogError};
use rollstitch_core::roll::{
    detect_rollovers, flicker_events, DominanceError, DominanceMap, DominanceResolver,
    SpreadError, SpreadScan,
};
use rollstitch_core::verify::{ContinuityVerifier, VerificationReport};

use crate::config::{BuildConfig, ConfigError};
use crate::report::{BuildMode, BuildReport, LoadSummary, REPORT_SCHEMA_VERSION};
use crate::rollover_log::{self, RolloverFileError};
use crate::sink::{ContinuousWriter, SinkError};

/// Rows between progress log lines.
pub const PROGRESS_EVERY: u64 = 5_000_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceReadError),

    #[error(transparent)]
    Dominance(#[from] DominanceError),

    #[error(transparent)]
    Spread(#[from] SpreadError),

    #[error(transparent)]
    Log(#[from] RolloverLogError),

    #[error(transparent)]
    LogFile(#[from] RolloverFileError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Levels(#[from] crate::levels::LevelFileError),

    #[error("no bars in {0} for the requested range")]
    NoData(PathBuf),

    #[error("cannot verify {path}: {reason}")]
    Verify { path: PathBuf, reason: String },
}

/// The three files a build touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub source: PathBuf,
    pub rollover_log: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub range: TimeRange,
    pub skip_verify: bool,
}

/// Periodic row-count logging for one streaming pass.
pub(crate) struct Progress {
    pass: &'static str,
    started: Instant,
    next: u64,
}

impl Progress {
    pub(crate) fn new(pass: &'static str) -> Self {
        Self {
            pass,
            started: Instant::now(),
            next: PROGRESS_EVERY,
        }
    }

    pub(crate) fn tick(&mut self, rows_read: u64, rows_written: u64) {
        if rows_read >= self.next {
            self.log(rows_read, rows_written, "progress");
            self.next = rows_read - rows_read % PROGRESS_EVERY + PROGRESS_EVERY;
        }
    }

    pub(crate) fn done(&self, rows_read: u64, rows_written: u64) {
        self.log(rows_read, rows_written, "pass complete");
    }

    fn log(&self, rows_read: u64, rows_written: u64, message: &str) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            rows_read as f64 / elapsed
        } else {
            0.0
        };
        tracing::info!(
            pass = self.pass,
            rows_read,
            rows_written,
            elapsed_secs = elapsed,
            rows_per_sec = rate.round() as u64,
            "{}",
            message
        );
    }
}

/// Warns once for each contract that does not belong to the product.
pub(crate) struct ContractWatch {
    product: Product,
    seen: HashSet<String>,
}

impl ContractWatch {
    pub(crate) fn new(product: Product) -> Self {
        Self {
            product,
            seen: HashSet::new(),
        }
    }

    pub(crate) fn check(&mut self, contract: &str) {
        if self.seen.contains(contract) {
            return;
        }
        self.seen.insert(contract.to_string());
        if !self.product.owns(contract) {
            tracing::warn!(contract, product = %self.product, "contract does not belong to product");
        }
    }
}

/// Output of pass 1.
pub(crate) struct DominancePass {
    pub map: DominanceMap,
    pub scan: ScanCounts,
}

/// Pass 1: per-bucket primary contract.
pub(crate) fn resolve_dominance(
    source: &dyn BarSource,
    config: &BuildConfig,
    no_data_path: &Path,
) -> Result<DominancePass, PipelineError> {
    let stats = ScanStats::new();
    let mut progress = Progress::new("dominance");
    let mut watch = ContractWatch::new(config.product);
    let mut resolver = DominanceResolver::new(config.bucket);

    for bar in source.scan(&stats)? {
        let bar = bar?;
        watch.check(&bar.contract);
        resolver.push(&bar)?;
        progress.tick(stats.rows_read(), 0);
    }
    let scan = stats.snapshot();
    progress.done(scan.rows_read, 0);

    if scan.bars_yielded == 0 {
        return Err(PipelineError::NoData(no_data_path.to_path_buf()));
    }
    let map = resolver.finish();
    tracing::info!(buckets = map.len(), width = %config.bucket, "dominance resolved");
    for share in map.distribution() {
        tracing::debug!(contract = %share.contract, buckets = share.buckets, "primary buckets");
    }
    Ok(DominancePass { map, scan })
}

/// Detect rollovers from the dominance map.
pub(crate) fn detect(map: &DominanceMap, config: &BuildConfig) -> Vec<RolloverEvent> {
    let events = detect_rollovers(map.records(), &config.persistence);
    tracing::info!(
        rollovers = events.len(),
        window = config.persistence.window,
        min_count = config.persistence.min_count,
        "rollovers detected"
    );
    events
}

/// Extra read-only pass pricing every rollover.
fn scan_spreads(
    source: &dyn BarSource,
    events: Vec<RolloverEvent>,
    window: Duration,
) -> Result<(Vec<RolloverEvent>, ScanCounts), PipelineError> {
    let stats = ScanStats::new();
    let mut progress = Progress::new("spreads");
    let mut scan = SpreadScan::new(events, window);
    for bar in source.scan(&stats)? {
        scan.observe(&bar?);
        progress.tick(stats.rows_read(), 0);
    }
    let counts = stats.snapshot();
    progress.done(counts.rows_read, 0);
    Ok((scan.finish()?, counts))
}

/// Pass 2: filter, shift and write.
fn adjust_pass(
    source: &dyn BarSource,
    schedule: &AdjustmentSchedule,
    map: &DominanceMap,
    config: &BuildConfig,
    output: &Path,
) -> Result<(AdjustCounts, ScanCounts), PipelineError> {
    let stats = ScanStats::new();
    let mut progress = Progress::new("adjust");
    let mut writer = ContinuousWriter::create(output, config.price_decimals)?;
    let mut adjuster = BackAdjuster::new(
        schedule,
        map,
        config.selection,
        config.product.continuous_symbol(),
    );

    for bar in source.scan(&stats)? {
        if let Some(out) = adjuster.push(bar?) {
            writer.write(&out)?;
        }
        progress.tick(stats.rows_read(), writer.rows());
    }
    let (last, counts) = adjuster.finish();
    if let Some(out) = last {
        writer.write(&out)?;
    }
    let written = writer.finish()?;
    let scan = stats.snapshot();
    progress.done(scan.rows_read, written);
    tracing::info!(
        output = %output.display(),
        rows = written,
        dropped_non_primary = counts.non_primary_dropped,
        dropped_duplicates = counts.duplicates_dropped,
        "continuous series written"
    );
    Ok((counts, scan))
}

/// Re-read a written continuous file and check its continuity.
pub fn verify_output(path: &Path, threshold: f64) -> Result<VerificationReport, PipelineError> {
    let unreadable = |reason: String| PipelineError::Verify {
        path: path.to_path_buf(),
        reason,
    };
    let mut reader = csv::Reader::from_path(path).map_err(|e| unreadable(e.to_string()))?;
    let header = reader.headers().map_err(|e| unreadable(e.to_string()))?.clone();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| unreadable(format!("missing column '{name}'")))
    };
    let ts_col = column(BarSchema::TIMESTAMP)?;
    let close_col = column(BarSchema::CLOSE)?;
    let contract_col = column(BarSchema::CONTRACT)?;

    let mut verifier = ContinuityVerifier::new(threshold);
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| unreadable(e.to_string()))?;
        let row = i + 2;
        let ts = parse_timestamp(&record[ts_col])
            .ok_or_else(|| unreadable(format!("line {row}: bad timestamp")))?;
        let close: f64 = record[close_col]
            .parse()
            .map_err(|_| unreadable(format!("line {row}: bad close")))?;
        verifier.observe(ts, close, &record[contract_col]);
    }
    let report = verifier.finish();
    tracing::info!(
        bars = report.bars,
        transitions = report.transitions.len(),
        flagged = report.flagged_transitions(),
        large_moves = report.large_move_count,
        "verification complete"
    );
    Ok(report)
}

/// Everything gathered before pass 2.
pub(crate) struct Prepared {
    pub mode: BuildMode,
    pub dominance: DominancePass,
    pub log: RolloverLog,
    pub spread_scan: Option<ScanCounts>,
    pub load: Option<LoadSummary>,
    pub started: Instant,
}

/// Pass 2, verification and the job report. Shared by every build mode.
pub(crate) fn finish_build(
    source: &dyn BarSource,
    prepared: Prepared,
    config: &BuildConfig,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<BuildReport, PipelineError> {
    let Prepared {
        mode,
        dominance,
        log,
        spread_scan,
        load,
        started,
    } = prepared;

    let schedule = AdjustmentSchedule::from_log(&log);
    tracing::info!(
        intervals = schedule.intervals().len(),
        total_adjustment = schedule.total_adjustment(),
        "adjustment schedule built"
    );
    let (adjust, adjust_scan) = adjust_pass(source, &schedule, &dominance.map, config, &paths.output)?;

    let verification = if options.skip_verify {
        tracing::info!("verification skipped");
        None
    } else {
        Some(verify_output(&paths.output, config.discontinuity_threshold)?)
    };

    let flicker_buckets = flicker_events(dominance.map.records()).len();
    let low_confidence_rollovers = log
        .events()
        .iter()
        .filter(|e| e.spread.map_or(false, |s| s.is_low_confidence()))
        .count();

    Ok(BuildReport {
        schema_version: REPORT_SCHEMA_VERSION,
        mode,
        config: config.clone(),
        config_id: config.config_id()?,
        source: paths.source.clone(),
        rollover_log: paths.rollover_log.clone(),
        output: paths.output.clone(),
        load,
        dominance_scan: dominance.scan,
        spread_scan,
        adjust_scan,
        adjust,
        buckets: dominance.map.len(),
        distribution: dominance.map.distribution(),
        flicker_buckets,
        rollovers: log.events().to_vec(),
        low_confidence_rollovers,
        total_adjustment: schedule.total_adjustment(),
        rollover_log_digest: rollover_log::digest(&log)?,
        verification,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}

/// Full streaming build: detect, price, write the log, then adjust.
pub fn run_build(
    config: &BuildConfig,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<BuildReport, PipelineError> {
    let started = Instant::now();
    config.validate()?;
    let source = CsvBarFile::new(&paths.source).with_range(options.range.clone());
    tracing::info!(source = %source.describe(), product = %config.product, "streaming build");

    let dominance = resolve_dominance(&source, config, &paths.source)?;
    let events = detect(&dominance.map, config);
    let (priced, spread_scan) = if events.is_empty() {
        (Vec::new(), None)
    } else {
        let (priced, counts) = scan_spreads(&source, events, config.spread_window())?;
        (priced, Some(counts))
    };
    let log = RolloverLog::new(priced)?;
    rollover_log::write(&paths.rollover_log, &log)?;

    let prepared = Prepared {
        mode: BuildMode::Streaming,
        dominance,
        log,
        spread_scan,
        load: None,
        started,
    };
    finish_build(&source, prepared, config, paths, options)
}

/// Streaming build from an existing rollover log. The log is never rewritten.
pub fn run_apply(
    config: &BuildConfig,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<BuildReport, PipelineError> {
    let started = Instant::now();
    config.validate()?;
    let log = rollover_log::read(&paths.rollover_log)?;
    if !paths.source.exists() {
        return Err(SourceReadError::Missing(paths.source.clone()).into());
    }
    let source = CsvBarFile::new(&paths.source).with_range(options.range.clone());
    tracing::info!(
        source = %source.describe(),
        rollovers = log.len(),
        "applying existing rollover log"
    );

    let dominance = resolve_dominance(&source, config, &paths.source)?;
    let prepared = Prepared {
        mode: BuildMode::Apply,
        dominance,
        log,
        spread_scan: None,
        load: None,
        started,
    };
    finish_build(&source, prepared, config, paths, options)
}
