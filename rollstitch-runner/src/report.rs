//! Job reports: everything an operator needs to audit one run.
//!
//! Every report carries a `schema_version`. Reports are written as pretty
//! JSON next to (or instead of) the printed summary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use rollstitch_core::adjust::AdjustCounts;
use rollstitch_core::data::{CanonicalizeReport, ScanCounts, SyntheticSpec};
use rollstitch_core::domain::RolloverEvent;
use rollstitch_core::roll::DominanceShare;
use rollstitch_core::verify::VerificationReport;

use crate::config::{BuildConfig, ConfigId};
use crate::sink::write_atomic;

/// Current report schema version.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// How the rollover log of a build was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Streaming build that detected rollovers and wrote the log.
    Streaming,
    /// In-memory batch build that detected rollovers and wrote the log.
    InMemory,
    /// Streaming build from an existing log.
    Apply,
}

/// Rows read by the lenient in-memory load, before canonicalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadSummary {
    pub read: ScanCounts,
    pub canonicalize: CanonicalizeReport,
    pub insane_bars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub schema_version: u32,
    pub mode: BuildMode,
    pub config: BuildConfig,
    pub config_id: ConfigId,
    pub source: PathBuf,
    pub rollover_log: PathBuf,
    pub output: PathBuf,
    pub load: Option<LoadSummary>,
    pub dominance_scan: ScanCounts,
    pub spread_scan: Option<ScanCounts>,
    pub adjust_scan: ScanCounts,
    pub adjust: AdjustCounts,
    pub buckets: usize,
    pub distribution: Vec<DominanceShare>,
    pub flicker_buckets: usize,
    pub rollovers: Vec<RolloverEvent>,
    pub low_confidence_rollovers: usize,
    /// Adjustment applied to the oldest bars.
    pub total_adjustment: f64,
    pub rollover_log_digest: String,
    pub verification: Option<VerificationReport>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelsReport {
    pub schema_version: u32,
    pub input: PathBuf,
    pub rollover_log: PathBuf,
    pub output: PathBuf,
    pub rollover_log_digest: String,
    pub rollovers: usize,
    pub total_adjustment: f64,
    pub timestamp_column: String,
    pub level_columns: Vec<String>,
    pub records: u64,
    pub values_adjusted: u64,
    /// Level cells that were blank or not numeric and passed through as-is.
    pub non_numeric_cells: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub schema_version: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub scan: ScanCounts,
    pub merged_rows: u64,
    pub bars_written: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthReport {
    pub schema_version: u32,
    pub output: PathBuf,
    pub spec: SyntheticSpec,
    pub contracts: Vec<String>,
    pub bars_written: u64,
}

/// Serialize any report to pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}
