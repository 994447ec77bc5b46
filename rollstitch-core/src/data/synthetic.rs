//! Synthetic multi-contract bar data for demos and tests.
//!
//! Produces a deterministic random walk traded simultaneously in a chain of
//! quarterly contracts. Contract `k` trades at the walk plus `k * carry`, so
//! every overlap measures exactly `carry` as the roll spread. During each
//! overlap window, volume migrates linearly from the outgoing contract to the
//! incoming one.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ContractCode, Product};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSpec {
    pub product: Product,
    pub start: NaiveDate,
    /// Number of contracts in the chain.
    pub contracts: usize,
    /// Calendar days each contract trades.
    pub days_per_contract: u32,
    /// Calendar days two neighbouring contracts trade together.
    pub overlap_days: u32,
    /// Minutes between bars.
    pub bar_minutes: u32,
    /// Price premium of each contract over the previous one.
    pub carry: f64,
    pub start_price: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            product: Product::Es,
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
            contracts: 3,
            days_per_contract: 30,
            overlap_days: 6,
            bar_minutes: 60,
            carry: 12.5,
            start_price: 4800.0,
            seed: 7,
        }
    }
}

impl SyntheticSpec {
    /// Days between the first days of two neighbouring contracts.
    fn step_days(&self) -> u32 {
        self.days_per_contract.saturating_sub(self.overlap_days).max(1)
    }

    /// Calendar days covered by the whole chain.
    pub fn total_days(&self) -> u32 {
        let n = self.contracts.max(1) as u32;
        self.step_days() * (n - 1) + self.days_per_contract
    }

    /// Contract codes in chain order, starting from the quarter of `start`.
    pub fn contract_codes(&self) -> Vec<ContractCode> {
        let mut codes = Vec::with_capacity(self.contracts);
        let mut code = self.product.front_quarterly_contract(self.start);
        for _ in 0..self.contracts {
            let next = code.next_quarterly();
            codes.push(code);
            code = next;
        }
        codes
    }

    /// Volume weight of contract `k` on chain day `day` (0 when not trading).
    fn volume_weight(&self, k: usize, day: u32) -> f64 {
        let first = self.step_days() * k as u32;
        let last = first + self.days_per_contract; // exclusive
        if day < first || day >= last {
            return 0.0;
        }
        let overlap = self.overlap_days.min(self.days_per_contract) as f64;
        let ramp = |d: u32| (f64::from(d) + 1.0) / (overlap + 1.0);
        let mut w = 1.0;
        if k > 0 && day < first + self.overlap_days {
            w = ramp(day - first);
        }
        if k + 1 < self.contracts && day >= last.saturating_sub(self.overlap_days) {
            let into_exit = day - last.saturating_sub(self.overlap_days);
            w = w.min(1.0 - ramp(into_exit));
        }
        w.max(0.0)
    }

    /// Generate the bars, sorted by timestamp then chain order.
    pub fn generate(&self) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let codes: Vec<String> = self.contract_codes().iter().map(|c| c.to_string()).collect();
        let tick = self.product.tick_size();
        let round = |p: f64| (p / tick).round() * tick;
        let bars_per_day = (24 * 60 / self.bar_minutes.max(1)) as i64;

        let mut bars = Vec::new();
        let mut price = self.start_price;

        for day in 0..self.total_days() {
            let date = self.start + Duration::days(i64::from(day));
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
            for slot in 0..bars_per_day {
                let timestamp = midnight + Duration::minutes(slot * i64::from(self.bar_minutes));
                let open = price;
                let close = round(price + rng.gen_range(-2.0..2.0));
                let high = open.max(close) + tick * f64::from(rng.gen_range(0..4u8));
                let low = open.min(close) - tick * f64::from(rng.gen_range(0..4u8));
                let noise: f64 = rng.gen_range(0.9..1.1);

                for (k, code) in codes.iter().enumerate() {
                    let weight = self.volume_weight(k, day);
                    if weight <= 0.0 {
                        continue;
                    }
                    let offset = self.carry * k as f64;
                    bars.push(Bar {
                        timestamp,
                        open: open + offset,
                        high: high + offset,
                        low: low + offset,
                        close: close + offset,
                        volume: (1_000.0 * weight * noise).round().max(1.0),
                        contract: code.clone(),
                    });
                }
                price = close;
            }
        }
        bars
    }
}
