//! Dominance resolver: per-bucket primary contract by traded volume.
//!
//! Bars are consumed in time order. Only the accumulators of the current
//! bucket are held; when a bar opens a new bucket the previous one is closed
//! into a [`DominanceRecord`] and its volumes are dropped.
//!
//! Ties on exactly equal volume go to the previous bucket's primary if it is
//! among the tied contracts, otherwise to the contract seen first in the
//! bucket. The rule is deterministic for any given input order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::bucket::BucketWidth;
use crate::domain::{Bar, DominanceRecord};

#[derive(Debug, Error, PartialEq)]
pub enum DominanceError {
    #[error("bar at {at} falls in a bucket before the current bucket {current}")]
    OutOfOrder {
        at: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// Volume per contract for one open bucket, in first-seen order.
#[derive(Debug)]
struct BucketVolumes {
    start: DateTime<Utc>,
    volumes: Vec<(String, f64)>,
}

impl BucketVolumes {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            volumes: Vec::new(),
        }
    }

    fn add(&mut self, contract: &str, volume: f64) {
        // A bucket rarely holds more than three live contracts.
        match self.volumes.iter_mut().find(|(c, _)| c == contract) {
            Some((_, total)) => *total += volume,
            None => self.volumes.push((contract.to_string(), volume)),
        }
    }

    fn primary(self, previous: Option<&str>) -> Option<String> {
        let max = self
            .volumes
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut tied = self.volumes.into_iter().filter(|(_, v)| *v == max);
        let first = tied.next()?;
        if previous == Some(first.0.as_str()) {
            return Some(first.0);
        }
        match tied.find(|(c, _)| Some(c.as_str()) == previous) {
            Some((c, _)) => Some(c),
            None => Some(first.0),
        }
    }
}

/// Streaming per-bucket volume aggregator.
#[derive(Debug)]
pub struct DominanceResolver {
    width: BucketWidth,
    current: Option<BucketVolumes>,
    records: Vec<DominanceRecord>,
}

impl DominanceResolver {
    pub fn new(width: BucketWidth) -> Self {
        Self {
            width,
            current: None,
            records: Vec::new(),
        }
    }

    /// Add one bar's volume. Calendar-spread bars are ignored.
    pub fn push(&mut self, bar: &Bar) -> Result<(), DominanceError> {
        if bar.is_spread() {
            return Ok(());
        }
        let start = self.width.bucket_start(bar.timestamp);
        match self.current.as_mut() {
            Some(bucket) if bucket.start == start => {
                bucket.add(&bar.contract, bar.volume);
                return Ok(());
            }
            Some(bucket) if start < bucket.start => {
                return Err(DominanceError::OutOfOrder {
                    at: bar.timestamp,
                    current: bucket.start,
                });
            }
            _ => {}
        }
        self.close_current();
        let mut bucket = BucketVolumes::new(start);
        bucket.add(&bar.contract, bar.volume);
        self.current = Some(bucket);
        Ok(())
    }

    fn close_current(&mut self) {
        if let Some(bucket) = self.current.take() {
            let start = bucket.start;
            let previous = self.records.last().map(|r| r.primary.as_str());
            if let Some(primary) = bucket.primary(previous) {
                self.records.push(DominanceRecord {
                    bucket_start: start,
                    primary,
                });
            }
        }
    }

    /// Close the last bucket and return the full map.
    pub fn finish(mut self) -> DominanceMap {
        self.close_current();
        DominanceMap {
            width: self.width,
            records: self.records,
        }
    }
}

/// Number of buckets a contract was primary for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DominanceShare {
    pub contract: String,
    pub buckets: usize,
}

/// Complete bucket -> primary contract map, ordered by bucket start.
#[derive(Debug, Clone, PartialEq)]
pub struct DominanceMap {
    width: BucketWidth,
    records: Vec<DominanceRecord>,
}

impl DominanceMap {
    /// Build a map from records already ordered by bucket start.
    pub fn from_records(width: BucketWidth, records: Vec<DominanceRecord>) -> Self {
        Self { width, records }
    }

    pub fn width(&self) -> BucketWidth {
        self.width
    }

    pub fn records(&self) -> &[DominanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Primary contract of the bucket containing `ts`.
    pub fn primary_at(&self, ts: DateTime<Utc>) -> Option<&str> {
        let start = self.width.bucket_start(ts);
        self.records
            .binary_search_by(|r| r.bucket_start.cmp(&start))
            .ok()
            .map(|i| self.records[i].primary.as_str())
    }

    /// True if `bar` belongs to its bucket's primary contract.
    pub fn is_primary(&self, bar: &Bar) -> bool {
        self.primary_at(bar.timestamp) == Some(bar.contract.as_str())
    }

    /// Buckets per primary contract, in order of first dominance.
    pub fn distribution(&self) -> Vec<DominanceShare> {
        let mut shares: Vec<DominanceShare> = Vec::new();
        for record in &self.records {
            match shares.iter_mut().find(|s| s.contract == record.primary) {
                Some(share) => share.buckets += 1,
                None => shares.push(DominanceShare {
                    contract: record.primary.clone(),
                    buckets: 1,
                }),
            }
        }
        shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, hour: u32, contract: &str, volume: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume,
            contract: contract.into(),
        }
    }

    fn resolve(width: BucketWidth, bars: &[Bar]) -> DominanceMap {
        let mut resolver = DominanceResolver::new(width);
        for b in bars {
            resolver.push(b).unwrap();
        }
        resolver.finish()
    }

    #[test]
    fn highest_volume_wins_each_bucket() {
        let map = resolve(
            BucketWidth::Day,
            &[
                bar(10, 1, "ESH4", 100.0),
                bar(10, 2, "ESM4", 60.0),
                bar(10, 3, "ESM4", 60.0),
                bar(11, 1, "ESH4", 10.0),
                bar(11, 2, "ESM4", 90.0),
            ],
        );
        let primaries: Vec<&str> = map.records().iter().map(|r| r.primary.as_str()).collect();
        assert_eq!(primaries, vec!["ESM4", "ESM4"]);
    }

    #[test]
    fn volume_is_summed_per_contract_across_bars() {
        let map = resolve(
            BucketWidth::Hour,
            &[
                bar(10, 1, "ESH4", 5.0),
                bar(10, 1, "ESM4", 8.0),
                bar(10, 1, "ESH4", 5.0),
            ],
        );
        assert_eq!(map.records()[0].primary, "ESH4");
    }

    #[test]
    fn spread_bars_do_not_count() {
        let map = resolve(
            BucketWidth::Day,
            &[bar(10, 1, "ESH4", 10.0), bar(10, 2, "ESH4-ESM4", 1_000.0)],
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.records()[0].primary, "ESH4");
    }

    #[test]
    fn tie_prefers_previous_primary() {
        let map = resolve(
            BucketWidth::Day,
            &[
                bar(10, 1, "ESM4", 50.0),
                bar(10, 2, "ESH4", 40.0),
                // Day 11: equal volume, ESH4 seen first but ESM4 was primary.
                bar(11, 1, "ESH4", 70.0),
                bar(11, 2, "ESM4", 70.0),
            ],
        );
        assert_eq!(map.records()[1].primary, "ESM4");
    }

    #[test]
    fn tie_without_previous_primary_takes_first_seen() {
        let map = resolve(
            BucketWidth::Day,
            &[bar(10, 1, "ESM4", 70.0), bar(10, 2, "ESH4", 70.0)],
        );
        assert_eq!(map.records()[0].primary, "ESM4");
    }

    #[test]
    fn out_of_order_bucket_is_rejected() {
        let mut resolver = DominanceResolver::new(BucketWidth::Day);
        resolver.push(&bar(11, 1, "ESH4", 1.0)).unwrap();
        let err = resolver.push(&bar(10, 1, "ESH4", 1.0)).unwrap_err();
        assert!(matches!(err, DominanceError::OutOfOrder { .. }));
    }

    #[test]
    fn primary_lookup_and_membership() {
        let map = resolve(
            BucketWidth::Day,
            &[bar(10, 1, "ESH4", 10.0), bar(12, 1, "ESM4", 10.0)],
        );
        let day10 = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let day11 = Utc.with_ymd_and_hms(2024, 3, 11, 18, 0, 0).unwrap();
        assert_eq!(map.primary_at(day10), Some("ESH4"));
        assert_eq!(map.primary_at(day11), None);
        assert!(map.is_primary(&bar(12, 5, "ESM4", 1.0)));
        assert!(!map.is_primary(&bar(12, 5, "ESH4", 1.0)));
    }

    #[test]
    fn distribution_counts_buckets_in_first_dominance_order() {
        let map = resolve(
            BucketWidth::Day,
            &[
                bar(10, 1, "ESH4", 10.0),
                bar(11, 1, "ESH4", 10.0),
                bar(12, 1, "ESM4", 10.0),
                bar(13, 1, "ESH4", 10.0),
            ],
        );
        assert_eq!(
            map.distribution(),
            vec![
                DominanceShare {
                    contract: "ESH4".into(),
                    buckets: 3
                },
                DominanceShare {
                    contract: "ESM4".into(),
                    buckets: 1
                },
            ]
        );
    }
}
