//! Errors surfaced by the query façade.

use crate::data::DataError;
use crate::domain::{IntervalError, SpecError, SymbolSpec};
use crate::refresh::FetchError;
use crate::registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid symbol: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("invalid interval: {0}")]
    InvalidInterval(#[from] IntervalError),

    #[error("invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("symbol {symbol} not found upstream")]
    UpstreamNotFound { symbol: String },

    #[error("upstream unavailable for {symbol}: {reason}")]
    UpstreamUnavailable { symbol: String, reason: String },

    #[error("rate limited fetching {symbol} (retry after {retry_after_secs}s)")]
    RateLimited { symbol: String, retry_after_secs: u64 },

    #[error("no data yet for {spec}")]
    NoData { spec: SymbolSpec },

    #[error("{spec} is not a tracked asset")]
    NotRegistered { spec: SymbolSpec },

    #[error("persist asset list: {0}")]
    Persistence(#[from] RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Map a provider failure for `symbol` onto the caller-facing taxonomy.
    pub fn from_data(symbol: &str, error: DataError) -> Self {
        match error {
            DataError::NotFound { .. } => ServiceError::UpstreamNotFound {
                symbol: symbol.to_string(),
            },
            DataError::RateLimited { retry_after_secs } => ServiceError::RateLimited {
                symbol: symbol.to_string(),
                retry_after_secs,
            },
            other => ServiceError::UpstreamUnavailable {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Stable tag for response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidSpec(_)
            | ServiceError::InvalidInterval(_)
            | ServiceError::InvalidLimit { .. } => "invalid_input",
            ServiceError::UpstreamNotFound { .. } => "upstream_not_found",
            ServiceError::UpstreamUnavailable { .. } => "upstream_unavailable",
            ServiceError::RateLimited { .. } => "rate_limited",
            ServiceError::NoData { .. } => "no_data",
            ServiceError::NotRegistered { .. } => "not_registered",
            ServiceError::Persistence(_) => "persistence",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind() == "invalid_input"
    }
}

impl From<FetchError> for ServiceError {
    fn from(e: FetchError) -> Self {
        ServiceError::from_data(e.symbol.as_str(), e.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn provider_errors_map_to_service_kinds() {
        let not_found = ServiceError::from_data(
            "XYZABC",
            DataError::NotFound {
                symbol: "XYZABC".into(),
            },
        );
        assert_eq!(not_found.kind(), "upstream_not_found");

        let limited =
            ServiceError::from_data("BTCUSDT", DataError::RateLimited { retry_after_secs: 7 });
        assert!(matches!(
            limited,
            ServiceError::RateLimited {
                retry_after_secs: 7,
                ..
            }
        ));

        let timeout = ServiceError::from_data(
            "BTCUSDT",
            DataError::Timeout {
                symbol: "BTCUSDT".into(),
                after: Duration::from_secs(3),
            },
        );
        assert_eq!(timeout.kind(), "upstream_unavailable");
        assert!(timeout.to_string().contains("timed out"));
    }

    #[test]
    fn spec_errors_are_invalid_input() {
        let err: ServiceError = SpecError::Empty.into();
        assert!(err.is_invalid_input());
        assert!(ServiceError::InvalidLimit { limit: 0, max: 10 }.is_invalid_input());
    }
}
