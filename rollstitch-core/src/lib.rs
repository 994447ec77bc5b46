//! Rollstitch Core — continuous back-adjusted futures series.
//!
//! This crate contains the whole transform, independent of files and CLI:
//! - Domain types (bars, contract codes, rollover events and log)
//! - Streaming multi-contract bar reader with spread and date filtering
//! - Per-bucket volume dominance and flicker-resistant rollover detection
//! - Overlap-median spread measurement (streaming and in-memory)
//! - Suffix-sum adjustment schedule, bar back-adjuster, auxiliary-series adjuster
//! - Continuity verification, minute aggregation, synthetic data

pub mod adjust;
pub mod data;
pub mod domain;
pub mod roll;
pub mod verify;

pub use adjust::{AdjustmentSchedule, BackAdjuster, ContractSelection, LevelAdjuster};
pub use domain::{Bar, ContinuousBar, Product, RolloverEvent, RolloverLog};
pub use roll::{BucketWidth, DominanceMap, DominanceResolver, PersistenceRule};
pub use verify::{ContinuityVerifier, VerificationReport};
