//! Scripted in-memory provider for tests and demos.
//!
//! Each symbol is given a script: a fixed series, a failure, or "stamped"
//! rows whose every close equals the call's sequence number (so a torn write
//! mixing two fetches is detectable). Unscripted symbols are `NotFound`.

use super::provider::{DataError, MarketDataProvider};
use crate::domain::{Candle, Interval, Symbol, TimeSeries};
use crate::locks::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Script {
    Series(Vec<Candle>),
    Fail(DataError),
    Stamped { rows: usize },
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<Symbol, Script>>,
    calls: Mutex<HashMap<Symbol, u64>>,
    sequence: AtomicU64,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a series from `(open_time_ms, close)` pairs.
    pub fn with_closes(self, symbol: &str, rows: &[(i64, f64)]) -> Self {
        self.set_closes(symbol, rows);
        self
    }

    pub fn set_closes(&self, symbol: &str, rows: &[(i64, f64)]) {
        let candles = rows
            .iter()
            .map(|&(ts, close)| Candle {
                open_time_ms: ts,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect();
        self.set_script(symbol, Script::Series(candles));
    }

    pub fn set_error(&self, symbol: &str, error: DataError) {
        self.set_script(symbol, Script::Fail(error));
    }

    pub fn set_stamped(&self, symbol: &str, rows: usize) {
        self.set_script(symbol, Script::Stamped { rows });
    }

    /// Sleep this long inside every fetch.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    fn set_script(&self, symbol: &str, script: Script) {
        match Symbol::parse(symbol) {
            Ok(symbol) => {
                lock(&self.scripts).insert(symbol, script);
            }
            Err(e) => tracing::warn!(symbol, error = %e, "ignoring script for invalid symbol"),
        }
    }

    /// Number of fetches made for `symbol`.
    pub fn calls(&self, symbol: &str) -> u64 {
        Symbol::parse(symbol)
            .ok()
            .and_then(|s| lock(&self.calls).get(&s).copied())
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        lock(&self.calls).values().sum()
    }
}

impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, DataError> {
        *lock(&self.calls).entry(symbol.clone()).or_insert(0) += 1;
        let stamp = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let script = lock(&self.scripts).get(symbol).cloned();
        let candles = match script {
            None => {
                return Err(DataError::NotFound {
                    symbol: symbol.to_string(),
                })
            }
            Some(Script::Fail(e)) => return Err(e),
            Some(Script::Series(candles)) => candles,
            Some(Script::Stamped { rows }) => (0..rows)
                .map(|i| Candle {
                    open_time_ms: i as i64 * interval.duration_ms(),
                    open: stamp as f64,
                    high: stamp as f64,
                    low: stamp as f64,
                    close: stamp as f64,
                    volume: stamp as f64,
                })
                .collect(),
        };

        Ok(TimeSeries::new(symbol.clone(), interval, limit, candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn unscripted_symbol_is_not_found() {
        let p = ScriptedProvider::new();
        let err = p.fetch_klines(&sym("XYZABC"), Interval::OneHour, 10).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(p.calls("XYZABC"), 1);
    }

    #[test]
    fn scripted_series_respects_limit() {
        let p = ScriptedProvider::new().with_closes("AAA", &[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let ts = p.fetch_klines(&sym("AAA"), Interval::OneHour, 2).unwrap();
        assert_eq!(ts.candles.iter().map(|c| c.close).collect::<Vec<_>>(), vec![2.0, 3.0]);
    }

    #[test]
    fn stamped_rows_share_one_stamp_per_call() {
        let p = ScriptedProvider::new();
        p.set_stamped("AAA", 5);
        let first = p.fetch_klines(&sym("AAA"), Interval::OneHour, 5).unwrap();
        let second = p.fetch_klines(&sym("AAA"), Interval::OneHour, 5).unwrap();
        assert!(first.candles.iter().all(|c| c.close == 1.0));
        assert!(second.candles.iter().all(|c| c.close == 2.0));
    }
}
