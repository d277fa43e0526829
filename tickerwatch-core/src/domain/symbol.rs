//! Symbol specifiers — a single exchange ticker or a ratio of two tickers.
//!
//! Specs are parsed once at the boundary (registry file, CLI, request body)
//! and carried as a tagged enum from then on. Textual form is `BTCUSDT` or
//! `BTCUSDT/ETHUSDT`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the two legs of a ratio spec.
pub const RATIO_SEPARATOR: char = '/';

/// Reasons a symbol or spec string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol '{symbol}' contains invalid character '{ch}'")]
    InvalidCharacter { symbol: String, ch: char },

    #[error("ratio '{0}' has an empty leg")]
    EmptyLeg(String),

    #[error("ratio '{0}' is nested (more than one '/')")]
    Nested(String),
}

/// A validated exchange ticker, upper-cased ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Validate and normalize a raw ticker.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SpecError::Empty);
        }
        if let Some(ch) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(SpecError::InvalidCharacter {
                symbol: trimmed.to_string(),
                ch,
            });
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// For compile-time literals already known to be valid.
    pub(crate) fn from_static(raw: &'static str) -> Self {
        debug_assert!(Self::parse(raw).is_ok(), "invalid static symbol {raw}");
        Self(raw.to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A tracked asset: either a plain symbol or the ratio `base / quote`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolSpec {
    Simple(Symbol),
    Ratio { base: Symbol, quote: Symbol },
}

impl SymbolSpec {
    /// Parse `A` or `A/B`. Exactly zero or one separator is accepted.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SpecError::Empty);
        }

        let mut parts = trimmed.split(RATIO_SEPARATOR);
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self::Simple(Symbol::parse(first)?)),
            (Some(second), None) => {
                if first.trim().is_empty() || second.trim().is_empty() {
                    return Err(SpecError::EmptyLeg(trimmed.to_string()));
                }
                Ok(Self::Ratio {
                    base: Symbol::parse(first)?,
                    quote: Symbol::parse(second)?,
                })
            }
            (Some(_), Some(_)) => Err(SpecError::Nested(trimmed.to_string())),
        }
    }

    pub fn simple(symbol: Symbol) -> Self {
        Self::Simple(symbol)
    }

    pub fn ratio(base: Symbol, quote: Symbol) -> Self {
        Self::Ratio { base, quote }
    }

    pub fn is_ratio(&self) -> bool {
        matches!(self, Self::Ratio { .. })
    }

    /// The symbols that must be fetched to materialize this spec.
    pub fn legs(&self) -> Vec<&Symbol> {
        match self {
            Self::Simple(symbol) => vec![symbol],
            Self::Ratio { base, quote } => vec![base, quote],
        }
    }
}

impl fmt::Display for SymbolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(symbol) => write!(f, "{symbol}"),
            Self::Ratio { base, quote } => write!(f, "{base}{RATIO_SEPARATOR}{quote}"),
        }
    }
}

impl FromStr for SymbolSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Symbol> for SymbolSpec {
    fn from(symbol: Symbol) -> Self {
        Self::Simple(symbol)
    }
}

impl Serialize for SymbolSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SymbolSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
