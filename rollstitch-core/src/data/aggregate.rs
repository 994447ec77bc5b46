//! Second-to-minute bar aggregation.
//!
//! Consecutive rows sharing a (minute, contract) key collapse into one bar:
//! first open, max high, min low, last close, summed volume. Input must be
//! time-ordered, as produced by the reader.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::domain::Bar;

/// Truncate a timestamp to the start of its minute.
pub fn minute_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::nanoseconds(
        i64::from(ts.second()) * 1_000_000_000 + i64::from(ts.nanosecond() % 1_000_000_000),
    )
}

/// Iterator adapter that merges second bars into minute bars.
pub struct MinuteAggregator<I> {
    inner: I,
    current: Option<Bar>,
    merged_rows: u64,
}

impl<I> MinuteAggregator<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            current: None,
            merged_rows: 0,
        }
    }

    /// Input rows folded into an earlier bar of the same minute.
    pub fn merged_rows(&self) -> u64 {
        self.merged_rows
    }
}

impl<I, E> Iterator for MinuteAggregator<I>
where
    I: Iterator<Item = Result<Bar, E>>,
{
    type Item = Result<Bar, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next() {
                Some(Ok(bar)) => {
                    let minute = minute_start(bar.timestamp);
                    match self.current.as_mut() {
                        Some(cur) if cur.timestamp == minute && cur.contract == bar.contract => {
                            cur.high = cur.high.max(bar.high);
                            cur.low = cur.low.min(bar.low);
                            cur.close = bar.close;
                            cur.volume += bar.volume;
                            self.merged_rows += 1;
                        }
                        _ => {
                            let started = Bar {
                                timestamp: minute,
                                ..bar
                            };
                            if let Some(done) = self.current.replace(started) {
                                return Some(Ok(done));
                            }
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return self.current.take().map(Ok),
            }
        }
    }
}
