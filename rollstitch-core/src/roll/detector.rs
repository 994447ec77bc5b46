//! Rollover detection with look-ahead persistence.
//!
//! A change of primary contract is only a rollover if the new contract stays
//! primary for at least `min_count` of the `window` buckets starting at the
//! change. Unconfirmed changes are flicker: they are ignored and the previous
//! contract stays the baseline that later buckets are compared against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DominanceRecord, RolloverEvent};

/// Minimum dominance duration required to confirm a rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceRule {
    /// Buckets examined, starting at the change.
    pub window: usize,
    /// Buckets within the window the new contract must be primary for.
    pub min_count: usize,
}

impl PersistenceRule {
    pub const fn new(window: usize, min_count: usize) -> Self {
        Self { window, min_count }
    }

    /// A rule is usable if it needs at least one bucket and fits its window.
    pub fn is_valid(&self) -> bool {
        self.min_count >= 1 && self.min_count <= self.window
    }

    fn confirms(&self, records: &[DominanceRecord], at: usize) -> bool {
        let candidate = &records[at].primary;
        let end = (at + self.window).min(records.len());
        let count = records[at..end]
            .iter()
            .filter(|r| &r.primary == candidate)
            .count();
        count >= self.min_count
    }
}

impl Default for PersistenceRule {
    fn default() -> Self {
        Self::new(5, 2)
    }
}

/// Emit the confirmed rollovers of a bucket sequence, spreads unset.
pub fn detect_rollovers(records: &[DominanceRecord], rule: &PersistenceRule) -> Vec<RolloverEvent> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let mut baseline = first.primary.as_str();
    let mut events = Vec::new();

    for (i, record) in records.iter().enumerate().skip(1) {
        if record.primary == baseline {
            continue;
        }
        if rule.confirms(records, i) {
            tracing::debug!(
                at = %record.bucket_start,
                from = baseline,
                to = %record.primary,
                "rollover confirmed"
            );
            events.push(RolloverEvent::new(
                record.bucket_start,
                baseline,
                record.primary.as_str(),
            ));
            baseline = record.primary.as_str();
        }
    }
    events
}

/// A single bucket whose primary differs from both neighbours, which agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlickerEvent {
    pub bucket_start: DateTime<Utc>,
    pub contract: String,
    pub surrounding: String,
}

/// Find A,B,A patterns in the primary sequence.
pub fn flicker_events(records: &[DominanceRecord]) -> Vec<FlickerEvent> {
    records
        .windows(3)
        .filter(|w| w[0].primary == w[2].primary && w[1].primary != w[0].primary)
        .map(|w| FlickerEvent {
            bucket_start: w[1].bucket_start,
            contract: w[1].primary.clone(),
            surrounding: w[0].primary.clone(),
        })
        .collect()
}
