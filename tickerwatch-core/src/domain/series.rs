//! Candles, time series, and derived ratio series.

use super::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MS_IN_MIN: i64 = 60_000;
const MS_IN_H: i64 = 60 * MS_IN_MIN;
const MS_IN_D: i64 = 24 * MS_IN_H;

/// Kline interval supported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported interval '{0}'")]
pub struct IntervalError(pub String);

impl Interval {
    pub const ALL: [Interval; 15] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    /// Provider wire name, e.g. `1h`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1M",
        }
    }

    /// Nominal width in milliseconds. A month counts as 30 days.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Interval::OneMinute => MS_IN_MIN,
            Interval::ThreeMinutes => 3 * MS_IN_MIN,
            Interval::FiveMinutes => 5 * MS_IN_MIN,
            Interval::FifteenMinutes => 15 * MS_IN_MIN,
            Interval::ThirtyMinutes => 30 * MS_IN_MIN,
            Interval::OneHour => MS_IN_H,
            Interval::TwoHours => 2 * MS_IN_H,
            Interval::FourHours => 4 * MS_IN_H,
            Interval::SixHours => 6 * MS_IN_H,
            Interval::EightHours => 8 * MS_IN_H,
            Interval::TwelveHours => 12 * MS_IN_H,
            Interval::OneDay => MS_IN_D,
            Interval::ThreeDays => 3 * MS_IN_D,
            Interval::OneWeek => 7 * MS_IN_D,
            Interval::OneMonth => 30 * MS_IN_D,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    // Case matters: `1m` is a minute, `1M` is a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == trimmed)
            .ok_or_else(|| IntervalError(trimmed.to_string()))
    }
}

/// One OHLCV row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Immutable result of one fetch: a symbol's candles at one interval.
///
/// Candles are sorted ascending by open time with no duplicates, and there are
/// at most `limit` of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub symbol: Symbol,
    pub interval: Interval,
    pub limit: usize,
    pub candles: Vec<Candle>,
}

impl TimeSeries {
    /// Build a series, sorting and de-duplicating rows and keeping the most
    /// recent `limit` of them.
    pub fn new(symbol: Symbol, interval: Interval, limit: usize, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time_ms);
        candles.dedup_by_key(|c| c.open_time_ms);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Self {
            symbol,
            interval,
            limit,
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Whether this series was fetched with the given parameters.
    pub fn matches(&self, interval: Interval, limit: usize) -> bool {
        self.interval == interval && self.limit == limit
    }

    pub fn closes(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.candles.iter().map(|c| (c.open_time_ms, c.close))
    }
}

/// A single ratio observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioPoint {
    pub open_time_ms: i64,
    pub ratio: f64,
}

/// `close(base) / close(quote)` on the timestamps both legs share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSeries {
    pub base: Symbol,
    pub quote: Symbol,
    pub interval: Interval,
    pub points: Vec<RatioPoint>,
}

impl RatioSeries {
    /// Align both legs on open time and divide closes.
    ///
    /// Timestamps missing from either leg are dropped (no forward fill), as are
    /// points where the quote close is zero or either close is not finite.
    pub fn compute(base: &TimeSeries, quote: &TimeSeries) -> Self {
        let quote_closes: HashMap<i64, f64> = quote.closes().collect();

        let points = base
            .closes()
            .filter_map(|(ts, base_close)| {
                let quote_close = *quote_closes.get(&ts)?;
                if !base_close.is_finite() || !quote_close.is_finite() || quote_close == 0.0 {
                    return None;
                }
                Some(RatioPoint {
                    open_time_ms: ts,
                    ratio: base_close / quote_close,
                })
            })
            .collect();

        Self {
            base: base.symbol.clone(),
            quote: quote.symbol.clone(),
            interval: base.interval,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.ratio).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            open_time_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn series(symbol: &str, rows: &[(i64, f64)]) -> TimeSeries {
        TimeSeries::new(
            Symbol::parse(symbol).unwrap(),
            Interval::OneHour,
            100,
            rows.iter().map(|&(ts, c)| candle(ts, c)).collect(),
        )
    }

    #[test]
    fn interval_round_trips_through_text() {
        for interval in Interval::ALL {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
        assert_eq!("1M".parse::<Interval>().unwrap(), Interval::OneMonth);
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::OneMinute);
        assert!("2m".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_serde_matches_wire_name() {
        let json = serde_json::to_string(&Interval::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
    }

    #[test]
    fn series_is_sorted_deduped_and_bounded() {
        let ts = TimeSeries::new(
            Symbol::parse("BTCUSDT").unwrap(),
            Interval::OneHour,
            2,
            vec![candle(3, 3.0), candle(1, 1.0), candle(2, 2.0), candle(2, 2.5)],
        );
        let times: Vec<i64> = ts.candles.iter().map(|c| c.open_time_ms).collect();
        assert_eq!(times, vec![2, 3]);
        assert!(ts.matches(Interval::OneHour, 2));
        assert!(!ts.matches(Interval::OneDay, 2));
    }

    #[test]
    fn ratio_of_aligned_closes() {
        let a = series("AAA", &[(1, 100.0), (2, 110.0)]);
        let b = series("BBB", &[(1, 50.0), (2, 55.0)]);
        let ratio = RatioSeries::compute(&a, &b);
        assert_eq!(ratio.values(), vec![2.0, 2.0]);
        assert_eq!(ratio.points[0].open_time_ms, 1);
        assert_eq!(ratio.points[1].open_time_ms, 2);
    }

    #[test]
    fn ratio_drops_unshared_timestamps_and_zero_quotes() {
        let a = series("AAA", &[(1, 10.0), (2, 20.0), (3, 30.0)]);
        let b = series("BBB", &[(2, 0.0), (3, 15.0), (4, 1.0)]);
        let ratio = RatioSeries::compute(&a, &b);
        assert_eq!(ratio.len(), 1);
        assert_eq!(ratio.points[0].open_time_ms, 3);
        assert_eq!(ratio.points[0].ratio, 2.0);
    }
}
