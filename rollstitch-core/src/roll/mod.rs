//! Front-contract tracking: volume dominance per bucket, rollover detection
//! and spread measurement.

pub mod bucket;
pub mod detector;
pub mod dominance;
pub mod spread;

pub use bucket::BucketWidth;
pub use detector::{detect_rollovers, flicker_events, FlickerEvent, PersistenceRule};
pub use dominance::{DominanceError, DominanceMap, DominanceResolver, DominanceShare};
pub use spread::{compute_spread, overlap_stats, SpreadError, SpreadScan};
