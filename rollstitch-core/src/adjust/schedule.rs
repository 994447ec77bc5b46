//! Adjustment schedule: the piecewise-constant offset implied by a rollover
//! log.
//!
//! With rollovers `r0 < r1 < ... < r(n-1)` the schedule has `n + 1`
//! intervals. Interval 0 covers everything before `r0` and carries
//! `-(s0 + ... + s(n-1))`; interval `i` starts at `r(i-1)` and carries
//! `-(s(i) + ... + s(n-1))`; the last interval carries exactly 0. A timestamp
//! equal to a switch timestamp belongs to the later interval.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::RolloverLog;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentInterval {
    /// Inclusive start; `None` for the open-ended first interval.
    pub lower_bound: Option<DateTime<Utc>>,
    pub adjustment: f64,
    /// Front contract of the period, when known from the log.
    pub contract: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentSchedule {
    intervals: Vec<AdjustmentInterval>,
}

impl AdjustmentSchedule {
    pub fn from_log(log: &RolloverLog) -> Self {
        let events = log.events();
        let spreads = log.spreads();

        // suffix[i] = spreads[i] + ... + spreads[n-1], summed from the most
        // recent rollover backwards.
        let mut suffix = vec![0.0; spreads.len() + 1];
        for i in (0..spreads.len()).rev() {
            suffix[i] = spreads[i] + suffix[i + 1];
        }

        let mut intervals = Vec::with_capacity(events.len() + 1);
        intervals.push(AdjustmentInterval {
            lower_bound: None,
            adjustment: 0.0 - suffix[0],
            contract: events.first().map(|e| e.from_contract.clone()),
        });
        for (i, event) in events.iter().enumerate() {
            intervals.push(AdjustmentInterval {
                lower_bound: Some(event.switch_ts),
                adjustment: 0.0 - suffix[i + 1],
                contract: Some(event.to_contract.clone()),
            });
        }
        Self { intervals }
    }

    /// A schedule that never adjusts.
    pub fn identity() -> Self {
        Self {
            intervals: vec![AdjustmentInterval {
                lower_bound: None,
                adjustment: 0.0,
                contract: None,
            }],
        }
    }

    pub fn intervals(&self) -> &[AdjustmentInterval] {
        &self.intervals
    }

    /// Adjustment applied to the oldest data.
    pub fn total_adjustment(&self) -> f64 {
        self.intervals[0].adjustment
    }

    /// Index of the interval containing `ts`.
    pub fn interval_index(&self, ts: DateTime<Utc>) -> usize {
        self.intervals[1..].partition_point(|iv| iv.lower_bound.map_or(true, |lb| lb <= ts))
    }

    /// Adjustment in force at `ts`, by binary search.
    pub fn adjustment_at(&self, ts: DateTime<Utc>) -> f64 {
        self.intervals[self.interval_index(ts)].adjustment
    }

    /// Forward-only cursor for time-ordered lookups.
    pub fn cursor(&self) -> AdjustmentCursor<'_> {
        AdjustmentCursor {
            schedule: self,
            index: 0,
        }
    }
}

impl Default for AdjustmentSchedule {
    fn default() -> Self {
        Self::identity()
    }
}

/// Advances through the schedule as timestamps increase, amortised O(1) per
/// lookup.
#[derive(Debug, Clone)]
pub struct AdjustmentCursor<'a> {
    schedule: &'a AdjustmentSchedule,
    index: usize,
}

impl<'a> AdjustmentCursor<'a> {
    /// Interval containing `ts`.
    pub fn advance(&mut self, ts: DateTime<Utc>) -> &'a AdjustmentInterval {
        let schedule: &'a AdjustmentSchedule = self.schedule;
        let intervals = &schedule.intervals;
        let behind = intervals[self.index]
            .lower_bound
            .map_or(false, |lb| ts < lb);
        if behind {
            // Out-of-order input: re-seek.
            self.index = schedule.interval_index(ts);
        }
        while self.index + 1 < intervals.len()
            && intervals[self.index + 1]
                .lower_bound
                .map_or(false, |lb| lb <= ts)
        {
            self.index += 1;
        }
        &intervals[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
