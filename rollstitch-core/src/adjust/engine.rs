//! Back-adjustment engine.
//!
//! Consumes time-ordered bars, keeps only those of the selected front
//! contract, and shifts their OHLC by the adjustment in force at their
//! timestamp. A one-bar buffer collapses repeated timestamps, keeping the
//! last bar seen.

use serde::{Deserialize, Serialize};

use super::schedule::{AdjustmentCursor, AdjustmentSchedule};
use crate::domain::{Bar, ContinuousBar};
use crate::roll::DominanceMap;

/// Which contract's bars form the continuous series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractSelection {
    /// The primary contract of each bar's own bucket.
    #[default]
    BucketPrimary,
    /// The contract in force between confirmed rollovers, ignoring flicker.
    RolloverPeriod,
}

/// Row counters for one adjustment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustCounts {
    pub bars_in: u64,
    pub non_primary_dropped: u64,
    pub duplicates_dropped: u64,
    pub bars_out: u64,
}

pub struct BackAdjuster<'a> {
    cursor: AdjustmentCursor<'a>,
    dominance: &'a DominanceMap,
    selection: ContractSelection,
    symbol: &'static str,
    /// Front contract for `RolloverPeriod` when the log has no rollovers.
    fallback_contract: Option<&'a str>,
    pending: Option<(Bar, f64)>,
    counts: AdjustCounts,
}

impl<'a> BackAdjuster<'a> {
    pub fn new(
        schedule: &'a AdjustmentSchedule,
        dominance: &'a DominanceMap,
        selection: ContractSelection,
        symbol: &'static str,
    ) -> Self {
        Self {
            cursor: schedule.cursor(),
            dominance,
            selection,
            symbol,
            fallback_contract: dominance.records().first().map(|r| r.primary.as_str()),
            pending: None,
            counts: AdjustCounts::default(),
        }
    }

    /// Feed one bar; returns a finished continuous bar when one is ready.
    pub fn push(&mut self, bar: Bar) -> Option<ContinuousBar> {
        self.counts.bars_in += 1;
        let interval = self.cursor.advance(bar.timestamp);

        let keep = match self.selection {
            ContractSelection::BucketPrimary => self.dominance.is_primary(&bar),
            ContractSelection::RolloverPeriod => {
                let front = interval.contract.as_deref().or(self.fallback_contract);
                front == Some(bar.contract.as_str())
            }
        };
        if !keep {
            self.counts.non_primary_dropped += 1;
            return None;
        }

        let adjustment = interval.adjustment;
        match self.pending.replace((bar, adjustment)) {
            Some((prev, prev_adj)) => {
                let same_ts = self
                    .pending
                    .as_ref()
                    .map_or(false, |(b, _)| b.timestamp == prev.timestamp);
                if same_ts {
                    self.counts.duplicates_dropped += 1;
                    None
                } else {
                    Some(self.emit(prev, prev_adj))
                }
            }
            None => None,
        }
    }

    fn emit(&mut self, bar: Bar, adjustment: f64) -> ContinuousBar {
        self.counts.bars_out += 1;
        ContinuousBar::from_bar(bar, adjustment, self.symbol)
    }

    /// Flush the buffered bar.
    pub fn finish(mut self) -> (Option<ContinuousBar>, AdjustCounts) {
        let last = self.pending.take().map(|(bar, adj)| self.emit(bar, adj));
        (last, self.counts)
    }

    /// Adjust a whole in-memory sequence.
    pub fn run<I>(mut self, bars: I) -> (Vec<ContinuousBar>, AdjustCounts)
    where
        I: IntoIterator<Item = Bar>,
    {
        let mut out: Vec<ContinuousBar> = bars.into_iter().filter_map(|b| self.push(b)).collect();
        let (last, counts) = self.finish();
        out.extend(last);
        (out, counts)
    }
}
