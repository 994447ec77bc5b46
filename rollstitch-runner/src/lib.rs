//! Rollstitch Runner — batch orchestration around `rollstitch-core`.
//!
//! This crate provides:
//! - Build configuration presets, TOML loading and the product file layout
//! - Two-pass streaming build and the in-memory batch build
//! - Rollover log persistence (the hand-off to later runs)
//! - Auxiliary level-file adjustment, minute aggregation, synthetic sources
//! - Atomic CSV output, JSON job reports and logging setup

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod levels;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod rollover_log;
pub mod sink;
pub mod synth;

pub use aggregate::run_aggregate;
pub use batch::run_build_in_memory;
pub use config::{BuildConfig, ConfigError, ConfigId, ProductLayout, Resolution};
pub use levels::{run_levels, LevelFileError, LevelFileSpec, LevelsPaths};
pub use logging::init_logging;
pub use pipeline::{run_apply, run_build, verify_output, BuildOptions, BuildPaths, PipelineError};
pub use report::{
    write_json, AggregateReport, BuildMode, BuildReport, LevelsReport, SynthReport,
    REPORT_SCHEMA_VERSION,
};
pub use rollover_log::RolloverFileError;
pub use sink::SinkError;
pub use synth::run_synth;
