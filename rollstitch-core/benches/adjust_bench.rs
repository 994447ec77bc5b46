//! Criterion benchmarks for Rollstitch hot paths.
//!
//! Benchmarks:
//! 1. Dominance resolution (per-bar bucket accumulation)
//! 2. Adjustment lookup (forward cursor vs binary search)
//! 3. Back-adjustment engine (filter + shift + dedupe)

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rollstitch_core::adjust::{AdjustmentSchedule, BackAdjuster, ContractSelection};
use rollstitch_core::data::SyntheticSpec;
use rollstitch_core::domain::{Bar, RolloverLog};
use rollstitch_core::roll::{
    compute_spread, detect_rollovers, BucketWidth, DominanceMap, DominanceResolver,
    PersistenceRule,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(contracts: usize, bar_minutes: u32) -> Vec<Bar> {
    SyntheticSpec {
        start: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
        contracts,
        days_per_contract: 100,
        overlap_days: 10,
        bar_minutes,
        ..SyntheticSpec::default()
    }
    .generate()
}

fn resolve(bars: &[Bar]) -> DominanceMap {
    let mut resolver = DominanceResolver::new(BucketWidth::Day);
    for bar in bars {
        resolver.push(bar).unwrap();
    }
    resolver.finish()
}

fn schedule(bars: &[Bar], map: &DominanceMap) -> AdjustmentSchedule {
    let events = detect_rollovers(map.records(), &PersistenceRule::new(5, 2))
        .iter()
        .map(|e| compute_spread(bars, e, Duration::hours(12)).unwrap())
        .collect();
    AdjustmentSchedule::from_log(&RolloverLog::new(events).unwrap())
}

// ── 1. Dominance ─────────────────────────────────────────────────────

fn bench_dominance(c: &mut Criterion) {
    let mut group = c.benchmark_group("dominance");

    for &minutes in &[60, 15, 5] {
        let bars = make_bars(4, minutes);
        group.bench_with_input(BenchmarkId::new("daily_buckets", bars.len()), &bars, |b, bars| {
            b.iter(|| resolve(black_box(bars)));
        });
    }

    group.finish();
}

// ── 2. Adjustment Lookup ─────────────────────────────────────────────

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjustment_lookup");
    let bars = make_bars(8, 15);
    let map = resolve(&bars);
    let sched = schedule(&bars, &map);

    group.bench_function("cursor", |b| {
        b.iter(|| {
            let mut cursor = sched.cursor();
            let mut sum = 0.0;
            for bar in &bars {
                sum += cursor.advance(bar.timestamp).adjustment;
            }
            black_box(sum)
        });
    });

    group.bench_function("binary_search", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for bar in &bars {
                sum += sched.adjustment_at(bar.timestamp);
            }
            black_box(sum)
        });
    });

    group.finish();
}

// ── 3. Back-Adjustment Engine ────────────────────────────────────────

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("back_adjuster");
    let bars = make_bars(8, 15);
    let map = resolve(&bars);
    let sched = schedule(&bars, &map);

    for selection in [ContractSelection::BucketPrimary, ContractSelection::RolloverPeriod] {
        group.bench_with_input(
            BenchmarkId::new(format!("{selection:?}"), bars.len()),
            &selection,
            |b, &selection| {
                b.iter(|| {
                    BackAdjuster::new(&sched, &map, selection, "ES_continuous")
                        .run(black_box(&bars).iter().cloned())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dominance, bench_lookup, bench_engine);
criterion_main!(benches);
