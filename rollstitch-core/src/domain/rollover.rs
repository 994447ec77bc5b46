//! Dominance records, rollover events and the rollover log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary (highest-volume) contract of one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominanceRecord {
    pub bucket_start: DateTime<Utc>,
    pub primary: String,
}

/// Measured price offset between the incoming and outgoing contract.
///
/// `spread` is `to - from`; min/max/count are kept for auditing even though
/// only the median is used for adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadStats {
    pub spread: f64,
    pub overlap_bars: usize,
    pub spread_min: f64,
    pub spread_max: f64,
}

impl SpreadStats {
    /// Stats for a spread taken from last/first prices (no overlap).
    pub fn fallback(spread: f64) -> Self {
        Self {
            spread,
            overlap_bars: 0,
            spread_min: spread,
            spread_max: spread,
        }
    }

    /// True when the spread came from the last/first price fallback.
    pub fn is_low_confidence(&self) -> bool {
        self.overlap_bars == 0
    }
}

/// A confirmed switch of the front contract.
///
/// Created by the detector with `spread == None`; the spread is attached
/// once by the spread calculator and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloverEvent {
    /// Start of the first bucket in which `to_contract` is primary.
    pub switch_ts: DateTime<Utc>,
    pub from_contract: String,
    pub to_contract: String,
    pub spread: Option<SpreadStats>,
}

impl RolloverEvent {
    pub fn new(
        switch_ts: DateTime<Utc>,
        from_contract: impl Into<String>,
        to_contract: impl Into<String>,
    ) -> Self {
        Self {
            switch_ts,
            from_contract: from_contract.into(),
            to_contract: to_contract.into(),
            spread: None,
        }
    }

    /// Attach the measured spread.
    pub fn with_spread(mut self, stats: SpreadStats) -> Self {
        self.spread = Some(stats);
        self
    }

    /// Signed spread, or `None` if not yet priced.
    pub fn spread_value(&self) -> Option<f64> {
        self.spread.map(|s| s.spread)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RolloverLogError {
    #[error("rollover {from} -> {to} at {at} has no spread")]
    Unpriced {
        at: DateTime<Utc>,
        from: String,
        to: String,
    },

    #[error("rollover at {at} is not after the previous rollover at {previous}")]
    OutOfOrder {
        at: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error("rollover at {at} has a non-finite spread")]
    NonFiniteSpread { at: DateTime<Utc> },
}

/// Ordered, fully priced sequence of rollovers.
///
/// This is the artifact shared between the back-adjustment of the bar series
/// and any later adjustment of an auxiliary series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RolloverLog {
    events: Vec<RolloverEvent>,
}

impl RolloverLog {
    /// Validate ordering and pricing.
    pub fn new(events: Vec<RolloverEvent>) -> Result<Self, RolloverLogError> {
        let mut previous: Option<DateTime<Utc>> = None;
        for event in &events {
            let spread = event.spread_value().ok_or_else(|| RolloverLogError::Unpriced {
                at: event.switch_ts,
                from: event.from_contract.clone(),
                to: event.to_contract.clone(),
            })?;
            if !spread.is_finite() {
                return Err(RolloverLogError::NonFiniteSpread { at: event.switch_ts });
            }
            if let Some(prev) = previous {
                if event.switch_ts <= prev {
                    return Err(RolloverLogError::OutOfOrder {
                        at: event.switch_ts,
                        previous: prev,
                    });
                }
            }
            previous = Some(event.switch_ts);
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[RolloverEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Spreads in chronological order.
    pub fn spreads(&self) -> Vec<f64> {
        self.events
            .iter()
            .map(|e| e.spread_value().unwrap_or(0.0))
            .collect()
    }

    /// Sum of all spreads (the negated adjustment applied to the oldest data).
    pub fn total_spread(&self) -> f64 {
        self.spreads().iter().sum()
    }
}
