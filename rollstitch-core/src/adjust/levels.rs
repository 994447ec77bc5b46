//! Auxiliary-series adjuster.
//!
//! Shifts values expressed in raw contract price space (support/resistance
//! levels, VWAPs, ...) by the same offset the bar series gets at the same
//! timestamp. Lookups go through the shared [`AdjustmentSchedule`], so a
//! level equal to a bar's raw close comes out equal to that bar's adjusted
//! close, bit for bit. Records may arrive in any order.

use chrono::{DateTime, Utc};

use super::schedule::AdjustmentSchedule;

pub struct LevelAdjuster<'a> {
    schedule: &'a AdjustmentSchedule,
    records: u64,
    values: u64,
}

impl<'a> LevelAdjuster<'a> {
    pub fn new(schedule: &'a AdjustmentSchedule) -> Self {
        Self {
            schedule,
            records: 0,
            values: 0,
        }
    }

    pub fn adjustment_at(&self, ts: DateTime<Utc>) -> f64 {
        self.schedule.adjustment_at(ts)
    }

    /// Shift every value of one record in place. Returns the offset applied.
    pub fn adjust_record(&mut self, ts: DateTime<Utc>, levels: &mut [f64]) -> f64 {
        let adjustment = self.adjustment_at(ts);
        for level in levels.iter_mut() {
            *level += adjustment;
        }
        self.records += 1;
        self.values += levels.len() as u64;
        adjustment
    }

    pub fn records_adjusted(&self) -> u64 {
        self.records
    }

    pub fn values_adjusted(&self) -> u64 {
        self.values
    }
}
