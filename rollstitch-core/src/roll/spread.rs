//! Spread calculator: price offset between the outgoing and incoming
//! contract at each rollover.
//!
//! The canonical spread is the median of `to_close - from_close` over every
//! timestamp inside the window where both contracts traded, keeping only the
//! last bar of each contract per timestamp. Without overlap the spread is the
//! first `to` close at or after the switch minus the last `from` close before
//! it, recorded with `overlap_bars == 0`.
//!
//! [`SpreadScan`] does this in one streaming pass for all rollovers;
//! [`compute_spread`] does it for one rollover over an in-memory sorted
//! slice. Both produce identical results for the same bars.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::{Bar, RolloverEvent, SpreadStats};

#[derive(Debug, Error, PartialEq)]
pub enum SpreadError {
    #[error("no overlap and no {missing} price to price rollover {from} -> {to} at {at}")]
    NoPrice {
        at: DateTime<Utc>,
        from: String,
        to: String,
        missing: String,
    },
}

/// Median, min and max of overlap differences. `None` when empty.
pub fn overlap_stats(mut diffs: Vec<f64>) -> Option<SpreadStats> {
    if diffs.is_empty() {
        return None;
    }
    diffs.sort_by(f64::total_cmp);
    let n = diffs.len();
    let median = if n % 2 == 1 {
        diffs[n / 2]
    } else {
        (diffs[n / 2 - 1] + diffs[n / 2]) / 2.0
    };
    Some(SpreadStats {
        spread: median,
        overlap_bars: n,
        spread_min: diffs[0],
        spread_max: diffs[n - 1],
    })
}

/// Per-rollover state gathered while bars go past.
#[derive(Debug)]
struct RolloverPricing {
    event: RolloverEvent,
    lo: DateTime<Utc>,
    hi: DateTime<Utc>,
    from_closes: BTreeMap<DateTime<Utc>, f64>,
    to_closes: BTreeMap<DateTime<Utc>, f64>,
    last_from_before: Option<f64>,
    first_to_after: Option<f64>,
}

impl RolloverPricing {
    fn new(event: RolloverEvent, window: Duration) -> Self {
        Self {
            lo: event.switch_ts - window,
            hi: event.switch_ts + window,
            event,
            from_closes: BTreeMap::new(),
            to_closes: BTreeMap::new(),
            last_from_before: None,
            first_to_after: None,
        }
    }

    fn in_window(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.lo && ts <= self.hi
    }

    /// Record an overlap-window bar. Later bars at the same timestamp win.
    fn observe_window(&mut self, bar: &Bar) {
        if !bar.close.is_finite() || !self.in_window(bar.timestamp) {
            return;
        }
        if bar.contract == self.event.from_contract {
            self.from_closes.insert(bar.timestamp, bar.close);
        } else if bar.contract == self.event.to_contract {
            self.to_closes.insert(bar.timestamp, bar.close);
        }
    }

    fn observe(&mut self, bar: &Bar) {
        if !bar.close.is_finite() {
            return;
        }
        let switch = self.event.switch_ts;
        if bar.contract == self.event.from_contract && bar.timestamp < switch {
            self.last_from_before = Some(bar.close);
        } else if bar.contract == self.event.to_contract
            && bar.timestamp >= switch
            && self.first_to_after.is_none()
        {
            self.first_to_after = Some(bar.close);
        }
        self.observe_window(bar);
    }

    fn finish(self) -> Result<RolloverEvent, SpreadError> {
        let diffs: Vec<f64> = self
            .to_closes
            .iter()
            .filter_map(|(ts, to)| self.from_closes.get(ts).map(|from| to - from))
            .collect();

        if let Some(stats) = overlap_stats(diffs) {
            return Ok(self.event.with_spread(stats));
        }

        let missing = |contract: &str| SpreadError::NoPrice {
            at: self.event.switch_ts,
            from: self.event.from_contract.clone(),
            to: self.event.to_contract.clone(),
            missing: contract.to_string(),
        };
        let to = self
            .first_to_after
            .ok_or_else(|| missing(&self.event.to_contract))?;
        let from = self
            .last_from_before
            .ok_or_else(|| missing(&self.event.from_contract))?;
        let spread = to - from;
        tracing::warn!(
            at = %self.event.switch_ts,
            from = %self.event.from_contract,
            to = %self.event.to_contract,
            spread,
            "no overlapping bars, spread taken from last/first prices"
        );
        Ok(self.event.with_spread(SpreadStats::fallback(spread)))
    }
}

/// Price one rollover from bars sorted by timestamp.
pub fn compute_spread(
    bars: &[Bar],
    event: &RolloverEvent,
    window: Duration,
) -> Result<RolloverEvent, SpreadError> {
    let mut pricing = RolloverPricing::new(event.clone(), window);

    let start = bars.partition_point(|b| b.timestamp < pricing.lo);
    let end = bars.partition_point(|b| b.timestamp <= pricing.hi);
    for bar in &bars[start..end] {
        pricing.observe_window(bar);
    }

    let switch = bars.partition_point(|b| b.timestamp < event.switch_ts);
    pricing.last_from_before = bars[..switch]
        .iter()
        .rev()
        .find(|b| b.contract == event.from_contract && b.close.is_finite())
        .map(|b| b.close);
    pricing.first_to_after = bars[switch..]
        .iter()
        .find(|b| b.contract == event.to_contract && b.close.is_finite())
        .map(|b| b.close);

    pricing.finish()
}

/// Streaming spread computation for a set of rollovers.
#[derive(Debug)]
pub struct SpreadScan {
    pending: Vec<RolloverPricing>,
}

impl SpreadScan {
    pub fn new(events: Vec<RolloverEvent>, window: Duration) -> Self {
        Self {
            pending: events
                .into_iter()
                .map(|e| RolloverPricing::new(e, window))
                .collect(),
        }
    }

    /// Feed one bar. Bars must arrive in timestamp order.
    pub fn observe(&mut self, bar: &Bar) {
        for pricing in &mut self.pending {
            pricing.observe(bar);
        }
    }

    /// Priced events in their original order.
    pub fn finish(self) -> Result<Vec<RolloverEvent>, SpreadError> {
        self.pending.into_iter().map(RolloverPricing::finish).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(hour: u32, minute: u32, contract: &str, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 14, hour, minute, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            contract: contract.into(),
        }
    }

    fn event(hour: u32) -> RolloverEvent {
        RolloverEvent::new(
            Utc.with_ymd_and_hms(2024, 3, 14, hour, 0, 0).unwrap(),
            "ESH4",
            "ESM4",
        )
    }

    fn scan(bars: &[Bar], ev: RolloverEvent, window: Duration) -> Result<RolloverEvent, SpreadError> {
        let mut scan = SpreadScan::new(vec![ev], window);
        for b in bars {
            scan.observe(b);
        }
        scan.finish().map(|mut v| v.remove(0))
    }

    #[test]
    fn median_of_odd_and_even_counts() {
        assert_eq!(overlap_stats(vec![3.0, 1.0, 2.0]).unwrap().spread, 2.0);
        let even = overlap_stats(vec![4.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(even.spread, 2.5);
        assert_eq!(even.spread_min, 1.0);
        assert_eq!(even.spread_max, 4.0);
        assert_eq!(even.overlap_bars, 4);
        assert!(overlap_stats(Vec::new()).is_none());
    }

    #[test]
    fn median_ignores_outlier_overlap() {
        let bars = vec![
            bar(10, 0, "ESH4", 100.0),
            bar(10, 0, "ESM4", 105.0),
            bar(10, 1, "ESH4", 101.0),
            bar(10, 1, "ESM4", 106.0),
            bar(10, 2, "ESH4", 102.0),
            bar(10, 2, "ESM4", 150.0),
        ];
        let priced = compute_spread(&bars, &event(12), Duration::hours(4)).unwrap();
        let stats = priced.spread.unwrap();
        assert_eq!(stats.spread, 5.0);
        assert_eq!(stats.overlap_bars, 3);
        assert_eq!(stats.spread_max, 48.0);
    }

    #[test]
    fn last_bar_per_timestamp_is_used() {
        let bars = vec![
            bar(10, 0, "ESH4", 100.0),
            bar(10, 0, "ESH4", 101.0),
            bar(10, 0, "ESM4", 110.0),
        ];
        let priced = compute_spread(&bars, &event(12), Duration::hours(4)).unwrap();
        assert_eq!(priced.spread_value(), Some(9.0));
    }

    #[test]
    fn bars_outside_window_are_ignored() {
        let bars = vec![
            bar(1, 0, "ESH4", 100.0),
            bar(1, 0, "ESM4", 200.0),
            bar(11, 0, "ESH4", 100.0),
            bar(11, 0, "ESM4", 104.0),
        ];
        let priced = compute_spread(&bars, &event(12), Duration::hours(4)).unwrap();
        let stats = priced.spread.unwrap();
        assert_eq!(stats.spread, 4.0);
        assert_eq!(stats.overlap_bars, 1);
    }

    #[test]
    fn fallback_uses_last_before_and_first_after() {
        let bars = vec![
            bar(1, 0, "ESH4", 100.0),
            bar(2, 0, "ESH4", 101.0),
            bar(20, 0, "ESM4", 107.0),
            bar(21, 0, "ESM4", 108.0),
        ];
        let priced = compute_spread(&bars, &event(12), Duration::hours(4)).unwrap();
        let stats = priced.spread.unwrap();
        assert_eq!(stats.spread, 6.0);
        assert!(stats.is_low_confidence());
    }

    #[test]
    fn fallback_without_prices_is_an_error() {
        let bars = vec![bar(1, 0, "ESH4", 100.0)];
        let err = compute_spread(&bars, &event(12), Duration::hours(4)).unwrap_err();
        assert!(matches!(err, SpreadError::NoPrice { ref missing, .. } if missing == "ESM4"));
    }

    #[test]
    fn streaming_scan_matches_in_memory() {
        let bars = vec![
            bar(1, 0, "ESH4", 100.0),
            bar(9, 0, "ESH4", 100.0),
            bar(9, 0, "ESM4", 104.5),
            bar(9, 0, "ESM4", 104.75),
            bar(11, 30, "ESH4", 99.0),
            bar(11, 30, "ESM4", 104.0),
            bar(13, 0, "ESM4", 105.0),
            bar(23, 0, "ESM4", 106.0),
        ];
        for hours in [1, 4, 12] {
            let window = Duration::hours(hours);
            assert_eq!(
                scan(&bars, event(12), window),
                compute_spread(&bars, &event(12), window)
            );
        }
    }

    #[test]
    fn streaming_fallback_matches_in_memory() {
        let bars = vec![
            bar(1, 0, "ESH4", 100.0),
            bar(2, 0, "ESH4", 101.0),
            bar(20, 0, "ESM4", 107.0),
        ];
        assert_eq!(
            scan(&bars, event(12), Duration::hours(4)),
            compute_spread(&bars, &event(12), Duration::hours(4))
        );
    }
}
