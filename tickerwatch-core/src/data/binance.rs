//! Binance spot kline provider.
//!
//! Fetches OHLCV rows from `GET /api/v3/klines`. Handles paging past the
//! 1000-row request cap, retries with exponential backoff, error
//! classification, and the circuit breaker. A 429 is retried only when its
//! `Retry-After` fits inside the backoff schedule, and never sooner than it
//! asks.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, MarketDataProvider};
use crate::config::{backoff_delay, ProviderConfig};
use crate::domain::{Candle, Interval, Symbol, TimeSeries};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Binance refuses `limit` above this per request.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Binance error code for an unknown symbol.
const INVALID_SYMBOL_CODE: i64 = -1121;

/// Error body returned alongside 4xx statuses.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance spot REST provider.
pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceProvider {
    pub fn new(
        settings: &ProviderConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("tickerwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, attempt)
    }

    /// Wait before retrying a 429, or `None` when the server asks for longer
    /// than the largest scheduled backoff and the caller should give up.
    fn rate_limit_wait(&self, retry_after_secs: u64) -> Option<Duration> {
        let wait = Duration::from_secs(retry_after_secs);
        (self.max_retries > 0 && wait <= self.backoff(self.max_retries)).then_some(wait)
    }

    fn klines_url(&self) -> String {
        format!("{}/api/v3/klines", self.base_url)
    }

    /// Fetch one page ending at `end_time` (inclusive), retrying transient failures.
    fn fetch_page(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, DataError> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        let mut last_error = None;
        let mut min_wait = Duration::ZERO;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt).max(min_wait);
                min_wait = Duration::ZERO;
                tracing::debug!(%symbol, attempt, ?delay, "retrying kline request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(self.klines_url()).query(&query).send() {
                Ok(resp) => resp,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    if e.is_connect() || e.is_timeout() {
                        continue;
                    }
                    break;
                }
            };

            let status = resp.status();

            if status == reqwest::StatusCode::IM_A_TEAPOT || status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                tracing::warn!(%symbol, retry_after, "rate limited by Binance");
                let error = DataError::RateLimited {
                    retry_after_secs: retry_after,
                };
                match self.rate_limit_wait(retry_after) {
                    Some(wait) => {
                        min_wait = wait;
                        last_error = Some(error);
                        continue;
                    }
                    None => return Err(error),
                }
            }

            if status.is_client_error() {
                let body = resp.text().unwrap_or_default();
                return Err(classify_client_error(symbol, status.as_u16(), &body));
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::Unavailable(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let rows: Vec<Vec<Value>> = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse klines for {symbol}: {e}"))
            })?;
            let candles = parse_klines(rows)?;
            self.circuit_breaker.record_success();
            return Ok(candles);
        }

        Err(last_error.unwrap_or_else(|| DataError::Unavailable("max retries exceeded".into())))
    }
}

impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    /// Page backwards from now until `limit` rows are collected or history runs out.
    fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, DataError> {
        let mut candles: Vec<Candle> = Vec::with_capacity(limit.min(MAX_KLINES_PER_REQUEST));
        let mut end_time: Option<i64> = None;

        while candles.len() < limit {
            let page_size = (limit - candles.len()).min(MAX_KLINES_PER_REQUEST);
            let mut page = self.fetch_page(symbol, interval, page_size, end_time)?;
            let received = page.len();
            let Some(first) = page.first() else {
                break;
            };
            end_time = Some(first.open_time_ms - 1);

            page.append(&mut candles);
            candles = page;

            if received < page_size {
                break;
            }
        }

        if candles.is_empty() {
            return Err(DataError::NotFound {
                symbol: symbol.to_string(),
            });
        }

        tracing::debug!(%symbol, %interval, rows = candles.len(), "fetched klines");
        Ok(TimeSeries::new(symbol.clone(), interval, limit, candles))
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Map a 4xx response to a provider error.
fn classify_client_error(symbol: &Symbol, status: u16, body: &str) -> DataError {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) if err.code == INVALID_SYMBOL_CODE => DataError::NotFound {
            symbol: symbol.to_string(),
        },
        Ok(err) => DataError::Unavailable(format!("HTTP {status} ({}): {}", err.code, err.msg)),
        Err(_) => DataError::Unavailable(format!("HTTP {status} for {symbol}")),
    }
}

/// Decode kline rows: `[open_time, "open", "high", "low", "close", "volume", ...]`.
fn parse_klines(rows: Vec<Vec<Value>>) -> Result<Vec<Candle>, DataError> {
    rows.iter().map(|row| parse_kline_row(row)).collect()
}

fn parse_kline_row(row: &[Value]) -> Result<Candle, DataError> {
    if row.len() < 6 {
        return Err(DataError::ResponseFormatChanged(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| DataError::ResponseFormatChanged("open_time is not an integer".into()))?;

    Ok(Candle {
        open_time_ms,
        open: decimal_field(&row[1], "open")?,
        high: decimal_field(&row[2], "high")?,
        low: decimal_field(&row[3], "low")?,
        close: decimal_field(&row[4], "close")?,
        volume: decimal_field(&row[5], "volume")?,
    })
}

/// Binance sends prices as decimal strings.
fn decimal_field(value: &Value, name: &str) -> Result<f64, DataError> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| DataError::ResponseFormatChanged(format!("{name} '{s}': {e}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("{name} out of range"))),
        other => Err(DataError::ResponseFormatChanged(format!(
            "{name} has unexpected type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn provider(max_retries: u32, base_delay_ms: u64) -> BinanceProvider {
        let settings = ProviderConfig {
            max_retries,
            base_delay_ms,
            ..ProviderConfig::default()
        };
        BinanceProvider::new(&settings, Arc::new(CircuitBreaker::default_provider())).unwrap()
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after() {
        let p = provider(3, 500);
        assert_eq!(p.rate_limit_wait(1), Some(Duration::from_secs(1)));
        assert_eq!(p.rate_limit_wait(2), Some(Duration::from_secs(2)));
        // Longer than the 2s top backoff: give up with RateLimited.
        assert_eq!(p.rate_limit_wait(60), None);
    }

    #[test]
    fn rate_limit_without_retries_gives_up() {
        assert_eq!(provider(0, 500).rate_limit_wait(0), None);
    }

    #[test]
    fn parses_kline_rows() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            [1_700_000_000_000i64, "100.5", "101.0", "99.5", "100.8", "12.5",
             1_700_003_599_999i64, "1260.0", 42, "6.0", "600.0", "0"],
            [1_700_003_600_000i64, "100.8", "102.0", "100.1", "101.9", "8.0",
             1_700_007_199_999i64, "815.0", 30, "4.0", "400.0", "0"]
        ]))
        .unwrap();

        let candles = parse_klines(rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time_ms, 1_700_000_000_000);
        assert_eq!(candles[0].close, 100.8);
        assert_eq!(candles[1].high, 102.0);
        assert_eq!(candles[1].volume, 8.0);
    }

    #[test]
    fn short_row_is_a_format_change() {
        let rows = vec![vec![json!(1), json!("1.0")]];
        assert!(matches!(
            parse_klines(rows),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn non_numeric_price_is_a_format_change() {
        let rows = vec![vec![
            json!(1),
            json!("abc"),
            json!("1"),
            json!("1"),
            json!("1"),
            json!("1"),
        ]];
        assert!(matches!(
            parse_klines(rows),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn invalid_symbol_code_maps_to_not_found() {
        let err = classify_client_error(
            &sym("XYZABC"),
            400,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn other_client_errors_are_transient() {
        let err = classify_client_error(
            &sym("BTCUSDT"),
            400,
            r#"{"code":-1100,"msg":"Illegal characters found in parameter."}"#,
        );
        assert!(matches!(err, DataError::Unavailable(_)));

        let err = classify_client_error(&sym("BTCUSDT"), 404, "<html>");
        assert!(matches!(err, DataError::Unavailable(_)));
    }
}
