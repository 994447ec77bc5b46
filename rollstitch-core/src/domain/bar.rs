//! Bar — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contract::is_calendar_spread;

/// OHLCV bar for a single contract month at a single timestamp.
///
/// Bars for one contract arrive in non-decreasing timestamp order. Bars for
/// different contracts interleave when read from a multi-contract file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Exchange contract code, e.g. `ESH5`.
    pub contract: String,
}

impl Bar {
    /// True if the contract code names a calendar spread (`ESH5-ESM5`).
    pub fn is_spread(&self) -> bool {
        is_calendar_spread(&self.contract)
    }

    /// Returns true if any OHLCV field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan()
            || self.high.is_nan()
            || self.low.is_nan()
            || self.close.is_nan()
            || self.volume.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    ///
    /// Back-adjusted prices can legitimately go negative, so positivity is
    /// not part of the check.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
    }
}

/// One bar of the back-adjusted continuous series.
///
/// OHLC carry the adjustment in force at `timestamp`; volume is copied
/// through untouched. `contract` keeps the original contract code for
/// traceability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuousBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: &'static str,
    pub contract: String,
}

impl ContinuousBar {
    /// Shift a raw bar by `adjustment` points.
    pub fn from_bar(bar: Bar, adjustment: f64, symbol: &'static str) -> Self {
        Self {
            timestamp: bar.timestamp,
            open: bar.open + adjustment,
            high: bar.high + adjustment,
            low: bar.low + adjustment,
            close: bar.close + adjustment,
            volume: bar.volume,
            symbol,
            contract: bar.contract,
        }
    }
}
