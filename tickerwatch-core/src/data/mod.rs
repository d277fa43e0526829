//! Market-data providers

pub mod binance;
pub mod circuit_breaker;
pub mod provider;
pub mod scripted;
pub mod synthetic;

pub use binance::BinanceProvider;
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use provider::{DataError, MarketDataProvider};
pub use scripted::{Script, ScriptedProvider};
pub use synthetic::SyntheticProvider;
