//! TickerWatch Core — asset registry, market cache, refresh scheduler, query service.
//!
//! This crate contains everything behind the service boundary:
//! - Domain types (symbol specs, intervals, candles, time and ratio series)
//! - Market-data providers (Binance REST, synthetic walks, scripted test doubles)
//! - Asset registry persisted as a flat file
//! - Concurrent cache with fresh/stale tracking
//! - Refresher and background scheduler
//! - `MarketService`, the façade callers use

pub mod api;
pub mod cache;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
mod locks;
pub mod refresh;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use api::{
    AssetRequest, AssetResponse, ChartType, ErrorBody, PlotRatioRequest, PlotRequest,
    PlotResponse, RefreshResponse,
};
pub use cache::{CacheEntry, CachedEntry, Freshness, Lookup, MarketCache};
pub use config::{ConfigError, WatchConfig};
pub use domain::{Interval, RatioSeries, Symbol, SymbolSpec, TimeSeries};
pub use error::ServiceError;
pub use refresh::{fetch_with_timeout, RefreshReport, Refresher};
pub use registry::{AssetRegistry, RegistryError};
pub use scheduler::{RefreshScheduler, SchedulerHandle};
pub use service::{AssetState, AssetStatus, DataStatus, MarketService, MarketView, RatioView};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared between the scheduler thread,
    /// the refresh pool and request handlers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<SymbolSpec>();
        require_sync::<SymbolSpec>();
        require_send::<TimeSeries>();
        require_sync::<TimeSeries>();
        require_send::<RatioSeries>();
        require_sync::<RatioSeries>();

        // Shared state
        require_send::<AssetRegistry>();
        require_sync::<AssetRegistry>();
        require_send::<MarketCache>();
        require_sync::<MarketCache>();
        require_send::<CachedEntry>();
        require_sync::<CachedEntry>();

        // Workers
        require_send::<Refresher>();
        require_sync::<Refresher>();
        require_send::<SchedulerHandle>();
        require_send::<MarketService>();
        require_sync::<MarketService>();

        // Providers
        require_send::<data::BinanceProvider>();
        require_sync::<data::BinanceProvider>();
        require_send::<data::ScriptedProvider>();
        require_sync::<data::ScriptedProvider>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
    }

    /// Architecture contract: providers are used only through the trait
    /// object, so the refresher can be handed any of them.
    #[test]
    fn providers_are_object_safe() {
        fn _check_trait_object_builds(
            provider: std::sync::Arc<dyn data::MarketDataProvider>,
            symbol: &Symbol,
        ) -> Result<TimeSeries, data::DataError> {
            provider.fetch_klines(symbol, Interval::OneHour, 1)
        }
    }
}
