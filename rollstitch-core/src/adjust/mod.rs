//! Back-adjustment: schedule, bar engine and auxiliary-series adjuster.

pub mod engine;
pub mod levels;
pub mod schedule;

pub use engine::{AdjustCounts, BackAdjuster, ContractSelection};
pub use levels::LevelAdjuster;
pub use schedule::{AdjustmentCursor, AdjustmentInterval, AdjustmentSchedule};
