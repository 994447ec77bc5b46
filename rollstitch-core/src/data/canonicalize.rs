use serde::{Deserialize, Serialize};

use crate::domain::Bar;

/// Canonicalizer for in-memory bar data
pub struct Canonicalizer;

/// What canonicalisation removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizeReport {
    pub duplicates_dropped: usize,
    pub was_sorted: bool,
}

impl Canonicalizer {
    /// Canonicalize data: stable sort by timestamp, then drop repeated
    /// (timestamp, contract) rows keeping the last occurrence.
    pub fn canonicalize(mut bars: Vec<Bar>) -> (Vec<Bar>, CanonicalizeReport) {
        let was_sorted = bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
        if !was_sorted {
            bars.sort_by_key(|b| b.timestamp);
        }

        let before = bars.len();
        let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
        let mut group_start = 0;
        for bar in bars {
            if out
                .last()
                .map_or(false, |last: &Bar| last.timestamp != bar.timestamp)
            {
                group_start = out.len();
            }
            // Same-timestamp groups are tiny (one row per live contract).
            if let Some(pos) = out[group_start..]
                .iter()
                .position(|b| b.contract == bar.contract)
            {
                out.remove(group_start + pos);
            }
            out.push(bar);
        }

        let report = CanonicalizeReport {
            duplicates_dropped: before - out.len(),
            was_sorted,
        };
        (out, report)
    }

    /// Count bars failing the OHLC sanity check.
    pub fn count_insane(bars: &[Bar]) -> usize {
        bars.iter().filter(|b| !b.is_sane()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(minute: u32, contract: &str, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 14, 10, minute, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            contract: contract.into(),
        }
    }

    #[test]
    fn test_canonicalize_sorts_data() {
        let bars = vec![bar(3, "ESH4", 3.0), bar(1, "ESH4", 1.0), bar(2, "ESH4", 2.0)];
        let (sorted, report) = Canonicalizer::canonicalize(bars);
        let closes: Vec<f64> = sorted.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert!(!report.was_sorted);
    }

    #[test]
    fn test_canonicalize_keeps_last_duplicate() {
        let bars = vec![
            bar(1, "ESH4", 100.0),
            bar(1, "ESM4", 150.0),
            bar(1, "ESH4", 101.0),
            bar(2, "ESH4", 102.0),
        ];
        let (deduped, report) = Canonicalizer::canonicalize(bars);
        assert_eq!(deduped.len(), 3);
        assert_eq!(report.duplicates_dropped, 1);
        assert!(report.was_sorted);
        let h4: Vec<f64> = deduped
            .iter()
            .filter(|b| b.contract == "ESH4")
            .map(|b| b.close)
            .collect();
        assert_eq!(h4, vec![101.0, 102.0]);
    }

    #[test]
    fn test_same_contract_on_different_minutes_is_not_duplicate() {
        let bars = vec![bar(1, "ESH4", 1.0), bar(2, "ESH4", 1.0)];
        let (out, report) = Canonicalizer::canonicalize(bars);
        assert_eq!(out.len(), 2);
        assert_eq!(report.duplicates_dropped, 0);
    }

    #[test]
    fn test_count_insane_flags_inverted_bars() {
        let mut bad = bar(1, "ESH4", 100.0);
        bad.high = 90.0;
        assert_eq!(Canonicalizer::count_insane(&[bad, bar(2, "ESH4", 100.0)]), 1);
    }
}
