//! Market-data provider trait and structured error types.
//!
//! The MarketDataProvider trait abstracts over kline sources (Binance REST,
//! synthetic walks, scripted test doubles) so the refresher never knows which
//! one it is talking to.

use crate::domain::{Interval, Symbol, TimeSeries};
use std::time::Duration;
use thiserror::Error;

/// Structured error types for provider calls.
///
/// Every variant except `NotFound` is transient: the symbol exists (or might)
/// and a later attempt can succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("symbol not found: {symbol}")]
    NotFound { symbol: String },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("fetch for {symbol} timed out after {after:?}")]
    Timeout { symbol: String, after: Duration },

    /// An earlier call for the same spec overran its timeout and has not
    /// returned yet.
    #[error("previous fetch for {symbol} is still running")]
    Busy { symbol: String },
}

impl DataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        !self.is_not_found()
    }
}

/// Trait for kline sources.
///
/// Calls are synchronous and may block for as long as the provider's own
/// retry policy allows; callers that need a hard bound wrap them with
/// [`fetch_with_timeout`](crate::refresh::fetch_with_timeout).
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch the most recent `limit` candles of `symbol` at `interval`.
    fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, DataError>;

    /// Check if the provider is currently accepting requests.
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_permanent() {
        let not_found = DataError::NotFound {
            symbol: "XYZABC".into(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());

        for e in [
            DataError::RateLimited { retry_after_secs: 1 },
            DataError::Unavailable("503".into()),
            DataError::NetworkUnreachable("dns".into()),
            DataError::CircuitBreakerTripped,
            DataError::Timeout {
                symbol: "BTCUSDT".into(),
                after: Duration::from_secs(1),
            },
            DataError::Busy {
                symbol: "BTCUSDT".into(),
            },
        ] {
            assert!(e.is_transient(), "{e} should be transient");
        }
    }
}
