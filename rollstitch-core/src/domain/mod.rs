//! Domain types for RollStitch

pub mod bar;
pub mod contract;
pub mod rollover;

pub use bar::{Bar, ContinuousBar};
pub use contract::{is_calendar_spread, ContractCode, ContractError, MonthCode, Product};
pub use rollover::{DominanceRecord, RolloverEvent, RolloverLog, RolloverLogError, SpreadStats};
