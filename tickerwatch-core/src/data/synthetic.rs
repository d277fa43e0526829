//! Synthetic provider for offline runs.
//!
//! Produces a deterministic random walk per (symbol, interval): the seed is the
//! blake3 hash of both, so repeated fetches return identical prices. Open
//! times are aligned to the interval grid ending at the current period, which
//! keeps ratio legs on shared timestamps.

use super::binance::MAX_KLINES_PER_REQUEST;
use super::provider::{DataError, MarketDataProvider};
use crate::domain::{Candle, Interval, Symbol, TimeSeries};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticProvider {
    /// Fixed "now" in ms; `None` uses the wall clock.
    pub now_ms: Option<i64>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock, for reproducible timestamps.
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: Some(now_ms),
        }
    }

    fn now_ms(&self) -> i64 {
        self.now_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, DataError> {
        let candles = generate_walk(symbol, interval, limit, self.now_ms());
        Ok(TimeSeries::new(symbol.clone(), interval, limit, candles))
    }
}

fn generate_walk(symbol: &Symbol, interval: Interval, limit: usize, now_ms: i64) -> Vec<Candle> {
    let seed_input = format!("{symbol}:{interval}");
    let seed: [u8; 32] = *blake3::hash(seed_input.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let step = interval.duration_ms();
    let last_open = now_ms - now_ms.rem_euclid(step);
    let first_open = last_open - step * (limit.saturating_sub(1) as i64);

    let mut price: f64 = rng.gen_range(10.0..1000.0);
    let mut candles = Vec::with_capacity(limit.min(MAX_KLINES_PER_REQUEST));

    for i in 0..limit {
        let change: f64 = rng.gen_range(-0.01..0.01);
        let open = price;
        let close = price * (1.0 + change);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
        let volume: f64 = rng.gen_range(10.0..10_000.0);

        candles.push(Candle {
            open_time_ms: first_open + step * i as i64,
            open,
            high,
            low,
            close,
            volume,
        });
        price = close;
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_123_456;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn walk_is_deterministic() {
        let p = SyntheticProvider::at(NOW);
        let a = p.fetch_klines(&sym("BTCUSDT"), Interval::OneHour, 50).unwrap();
        let b = p.fetch_klines(&sym("BTCUSDT"), Interval::OneHour, 50).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_symbols_differ() {
        let p = SyntheticProvider::at(NOW);
        let a = p.fetch_klines(&sym("BTCUSDT"), Interval::OneHour, 10).unwrap();
        let b = p.fetch_klines(&sym("ETHUSDT"), Interval::OneHour, 10).unwrap();
        assert_ne!(a.candles, b.candles);
    }

    #[test]
    fn open_times_sit_on_the_interval_grid() {
        let p = SyntheticProvider::at(NOW);
        let ts = p.fetch_klines(&sym("BTCUSDT"), Interval::OneHour, 24).unwrap();
        assert_eq!(ts.len(), 24);
        let step = Interval::OneHour.duration_ms();
        for pair in ts.candles.windows(2) {
            assert_eq!(pair[1].open_time_ms - pair[0].open_time_ms, step);
        }
        assert_eq!(ts.last().unwrap().open_time_ms % step, 0);
        assert!(ts.last().unwrap().open_time_ms <= NOW);
    }

    #[test]
    fn candles_are_sane() {
        let p = SyntheticProvider::at(NOW);
        let ts = p.fetch_klines(&sym("SOLUSDT"), Interval::OneDay, 100).unwrap();
        for c in &ts.candles {
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
            assert!(c.close > 0.0);
        }
    }
}
