//! Property tests for registry and series invariants.
//!
//! Uses proptest to verify:
//! 1. Registry persistence — reload yields the same ordered, de-duplicated list
//! 2. Registry membership — removal leaves every other spec in order
//! 3. Ratio alignment — points exist only on shared timestamps, in order
//! 4. Series bounds — a built series is sorted, unique, and within its limit

use proptest::prelude::*;
use std::collections::HashSet;
use tickerwatch_core::domain::{Candle, Interval, RatioSeries, Symbol, SymbolSpec, TimeSeries};
use tickerwatch_core::AssetRegistry;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_symbol() -> impl Strategy<Value = Symbol> {
    "[A-Z]{1,4}".prop_map(|s| Symbol::parse(&s).unwrap())
}

fn arb_spec() -> impl Strategy<Value = SymbolSpec> {
    prop_oneof![
        3 => arb_symbol().prop_map(SymbolSpec::Simple),
        1 => (arb_symbol(), arb_symbol()).prop_map(|(b, q)| SymbolSpec::ratio(b, q)),
    ]
}

fn arb_rows() -> impl Strategy<Value = Vec<(i64, f64)>> {
    prop::collection::vec((0i64..64, 0.5..1000.0_f64), 0..40)
}

fn series(symbol: &str, limit: usize, rows: &[(i64, f64)]) -> TimeSeries {
    let candles = rows
        .iter()
        .map(|&(slot, close)| Candle {
            open_time_ms: slot * 3_600_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        })
        .collect();
    TimeSeries::new(Symbol::parse(symbol).unwrap(), Interval::OneHour, limit, candles)
}

fn first_occurrences(specs: &[SymbolSpec]) -> Vec<SymbolSpec> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .filter(|s| seen.insert((*s).clone()))
        .cloned()
        .collect()
}

// ── 1. Registry persistence ──────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever is added, a reload from disk returns the same list.
    #[test]
    fn registry_round_trips(specs in prop::collection::vec(arb_spec(), 0..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.txt");

        let registry = AssetRegistry::load(&path).unwrap();
        for spec in &specs {
            registry.add(spec.clone()).unwrap();
        }
        let expected = first_occurrences(&specs);
        prop_assert_eq!(registry.list(), expected.clone());

        let reloaded = AssetRegistry::load(&path).unwrap();
        prop_assert_eq!(reloaded.list(), expected);
    }
}

// ── 2. Registry membership ───────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Removing one spec keeps the others in their original order.
    #[test]
    fn remove_preserves_order(
        specs in prop::collection::vec(arb_spec(), 1..15),
        pick in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let registry = AssetRegistry::load(dir.path().join("assets.txt")).unwrap();
        for spec in &specs {
            registry.add(spec.clone()).unwrap();
        }
        let before = registry.list();
        let victim = before[pick.index(before.len())].clone();

        prop_assert!(registry.remove(&victim).unwrap());
        prop_assert!(!registry.contains(&victim));

        let expected: Vec<_> = before.into_iter().filter(|s| *s != victim).collect();
        prop_assert_eq!(registry.list(), expected);
    }
}

// ── 3. Ratio alignment ───────────────────────────────────────────────

proptest! {
    /// Ratio points sit on timestamps present in both legs, ascending, and
    /// each equals base close over quote close.
    #[test]
    fn ratio_uses_shared_timestamps(base_rows in arb_rows(), quote_rows in arb_rows()) {
        let base = series("AAA", 1000, &base_rows);
        let quote = series("BBB", 1000, &quote_rows);
        let ratio = RatioSeries::compute(&base, &quote);

        let base_ts: HashSet<i64> = base.candles.iter().map(|c| c.open_time_ms).collect();
        let quote_ts: HashSet<i64> = quote.candles.iter().map(|c| c.open_time_ms).collect();
        prop_assert_eq!(ratio.len(), base_ts.intersection(&quote_ts).count());

        for pair in ratio.points.windows(2) {
            prop_assert!(pair[0].open_time_ms < pair[1].open_time_ms);
        }
        for point in &ratio.points {
            let b = base.candles.iter().find(|c| c.open_time_ms == point.open_time_ms).unwrap();
            let q = quote.candles.iter().find(|c| c.open_time_ms == point.open_time_ms).unwrap();
            prop_assert!((point.ratio - b.close / q.close).abs() < 1e-9);
        }
    }
}

// ── 4. Series bounds ─────────────────────────────────────────────────

proptest! {
    /// A built series is strictly ascending and keeps the newest `limit` rows.
    #[test]
    fn series_is_sorted_and_bounded(rows in arb_rows(), limit in 1usize..50) {
        let ts = series("AAA", limit, &rows);
        let distinct: HashSet<i64> = rows.iter().map(|&(slot, _)| slot).collect();

        prop_assert_eq!(ts.len(), distinct.len().min(limit));
        for pair in ts.candles.windows(2) {
            prop_assert!(pair[0].open_time_ms < pair[1].open_time_ms);
        }
        if let Some(newest) = distinct.iter().max() {
            prop_assert_eq!(ts.last().unwrap().open_time_ms, newest * 3_600_000);
        }
    }
}
