//! Service configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! [registry]
//! path = "assets.txt"
//!
//! [refresh]
//! period_secs = 300
//! fetch_timeout_secs = 60
//! fetch_concurrency = 4
//!
//! [series]
//! interval = "1h"
//! limit = 5000
//! max_limit = 20000
//! fallback_symbol = "BTCUSDT"
//!
//! [provider]
//! base_url = "https://api.binance.com"
//! ```

use crate::domain::{Interval, Symbol};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub registry: RegistryConfig,
    pub refresh: RefreshConfig,
    pub series: SeriesConfig,
    pub provider: ProviderConfig,
}

/// Where the tracked-asset list lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: PathBuf,
}

/// Scheduler timing and fetch bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between scheduled refresh passes.
    pub period_secs: u64,
    /// Upper bound on a single symbol fetch, retries included. Must cover
    /// [`ProviderConfig::retry_budget`].
    pub fetch_timeout_secs: u64,
    /// Worker threads used to fetch symbols in parallel within one pass.
    pub fetch_concurrency: usize,
}

/// Parameters of the series kept in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeriesConfig {
    pub interval: Interval,
    pub limit: usize,
    /// Largest `limit` a query may ask for.
    pub max_limit: usize,
    /// Shown by the default view when no asset is registered.
    pub fallback_symbol: Symbol,
}

/// Binance REST client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets.txt"),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            period_secs: 5 * 60,
            fetch_timeout_secs: 60,
            fetch_concurrency: 4,
        }
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneHour,
            limit: 5000,
            max_limit: 20_000,
            fallback_symbol: Symbol::from_static("BTCUSDT"),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            base_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

impl RefreshConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Retries are capped so backoff arithmetic stays small.
const MAX_PROVIDER_RETRIES: u32 = 10;

impl ProviderConfig {
    /// Sleep before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(Duration::from_millis(self.base_delay_ms), attempt)
    }

    /// Longest one page request can take with every retry used: each attempt
    /// hits the request timeout and each wait is the longest backoff.
    pub fn retry_budget(&self) -> Duration {
        let attempts = Duration::from_secs(self.request_timeout_secs)
            .saturating_mul(self.max_retries.saturating_add(1));
        let waits = self
            .backoff(self.max_retries)
            .saturating_mul(self.max_retries);
        attempts.saturating_add(waits)
    }
}

/// `base * 2^(attempt - 1)`, zero for attempt 0.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    match attempt {
        0 => Duration::ZERO,
        n => base.saturating_mul(2u32.saturating_pow(n - 1)),
    }
}

impl WatchConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.period_secs == 0 {
            return Err(ConfigError::Invalid("refresh.period_secs must be > 0".into()));
        }
        if self.refresh.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh.fetch_timeout_secs must be > 0".into(),
            ));
        }
        if self.refresh.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "refresh.fetch_concurrency must be > 0".into(),
            ));
        }
        if self.series.limit == 0 {
            return Err(ConfigError::Invalid("series.limit must be > 0".into()));
        }
        if self.series.limit > self.series.max_limit {
            return Err(ConfigError::Invalid(format!(
                "series.limit {} exceeds series.max_limit {}",
                self.series.limit, self.series.max_limit
            )));
        }
        if self.provider.max_retries > MAX_PROVIDER_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "provider.max_retries must be <= {MAX_PROVIDER_RETRIES}"
            )));
        }
        let budget = self.provider.retry_budget();
        if self.refresh.fetch_timeout() < budget {
            return Err(ConfigError::Invalid(format!(
                "refresh.fetch_timeout_secs ({}) is shorter than the provider retry budget ({:.1}s)",
                self.refresh.fetch_timeout_secs,
                budget.as_secs_f64()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = WatchConfig::from_toml("").unwrap();
        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.refresh.period(), Duration::from_secs(300));
        assert_eq!(config.series.interval, Interval::OneHour);
        assert_eq!(config.series.limit, 5000);
        assert_eq!(config.series.fallback_symbol.as_str(), "BTCUSDT");
        assert_eq!(config.registry.path, PathBuf::from("assets.txt"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = WatchConfig::from_toml(
            r#"
            [refresh]
            period_secs = 60

            [series]
            interval = "1d"
            "#,
        )
        .unwrap();
        assert_eq!(config.refresh.period_secs, 60);
        assert_eq!(config.refresh.fetch_timeout_secs, 60);
        assert_eq!(config.series.interval, Interval::OneDay);
        assert_eq!(config.series.limit, 5000);
    }

    #[test]
    fn rejects_bad_interval() {
        let err = WatchConfig::from_toml("[series]\ninterval = \"7h\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_period() {
        let err = WatchConfig::from_toml("[refresh]\nperiod_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_timeout_covers_retry_budget() {
        let config = WatchConfig::default();
        // 4 attempts x 10s, plus 3 waits of at most 2s.
        assert_eq!(config.provider.retry_budget(), Duration::from_secs(46));
        assert!(config.refresh.fetch_timeout() >= config.provider.retry_budget());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_timeout_shorter_than_retry_budget() {
        let err = WatchConfig::from_toml("[refresh]\nfetch_timeout_secs = 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("retry budget")));

        let ok = WatchConfig::from_toml(
            "[refresh]\nfetch_timeout_secs = 5\n[provider]\nrequest_timeout_secs = 1\nmax_retries = 0\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn rejects_limit_above_max() {
        let err = WatchConfig::from_toml("[series]\nlimit = 30000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            WatchConfig::from_toml("[series]\nlimit = 30000\nmax_limit = 50000\n").unwrap();
        assert_eq!(config.series.max_limit, 50_000);
    }

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickerwatch.toml");
        std::fs::write(&path, "[registry]\npath = \"/tmp/assets.txt\"\n").unwrap();
        let config = WatchConfig::from_file(&path).unwrap();
        assert_eq!(config.registry.path, PathBuf::from("/tmp/assets.txt"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = WatchConfig::from_file(Path::new("/nonexistent/tickerwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
