//! Domain types for TickerWatch

pub mod series;
pub mod symbol;

pub use series::{Candle, Interval, IntervalError, RatioPoint, RatioSeries, TimeSeries};
pub use symbol::{SpecError, Symbol, SymbolSpec, RATIO_SEPARATOR};
