//! Domain primitives: TimeMs, PortfolioId, Symbol, InstrumentKey, TradeKind.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Fractional days elapsed from `self` until `later` (negative if `later` is earlier).
    pub fn days_until(&self, later: TimeMs) -> f64 {
        (later.0 - self.0) as f64 / 86_400_000.0
    }
}

/// Portfolio identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioId(pub Uuid);

impl PortfolioId {
    pub fn new_v4() -> Self {
        PortfolioId(Uuid::new_v4())
    }
}

impl std::fmt::Display for PortfolioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortfolioId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(PortfolioId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimitiveParseError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("symbol contains invalid characters: {0}")]
    InvalidSymbol(String),
    #[error("instrument key must not be empty")]
    EmptyInstrumentKey,
    #[error("unknown trade kind: {0}")]
    UnknownKind(String),
}

/// Ticker symbol in canonical uppercase form (e.g., "BTC").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw symbol.
    pub fn parse(raw: &str) -> Result<Self, PrimitiveParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveParseError::EmptySymbol);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(PrimitiveParseError::InvalidSymbol(trimmed.to_string()));
        }
        Ok(Symbol(trimmed.to_ascii_uppercase()))
    }

    /// Wrap a value already in canonical form (e.g., read back from storage).
    pub fn from_canonical(value: String) -> Self {
        Symbol(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-side stable instrument key in lowercase form (e.g., "bitcoin").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentKey(String);

impl InstrumentKey {
    pub fn parse(raw: &str) -> Result<Self, PrimitiveParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveParseError::EmptyInstrumentKey);
        }
        Ok(InstrumentKey(trimmed.to_ascii_lowercase()))
    }

    pub fn from_canonical(value: String) -> Self {
        InstrumentKey(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade kind: BUY or SELL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
        }
    }
}

impl FromStr for TradeKind {
    type Err = PrimitiveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeKind::Buy),
            "SELL" => Ok(TradeKind::Sell),
            other => Err(PrimitiveParseError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalized_to_uppercase() {
        assert_eq!(Symbol::parse(" btc ").unwrap().as_str(), "BTC");
        assert_eq!(Symbol::parse("Eth").unwrap().as_str(), "ETH");
    }

    #[test]
    fn test_symbol_rejects_empty_and_garbage() {
        assert_eq!(Symbol::parse("   "), Err(PrimitiveParseError::EmptySymbol));
        assert!(matches!(
            Symbol::parse("BT C"),
            Err(PrimitiveParseError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_instrument_key_lowercased() {
        assert_eq!(InstrumentKey::parse("Bitcoin").unwrap().as_str(), "bitcoin");
    }

    #[test]
    fn test_trade_kind_parse_case_insensitive() {
        assert_eq!("buy".parse::<TradeKind>().unwrap(), TradeKind::Buy);
        assert_eq!(" Sell ".parse::<TradeKind>().unwrap(), TradeKind::Sell);
        assert!("hold".parse::<TradeKind>().is_err());
    }

    #[test]
    fn test_trade_kind_serialization() {
        let json = serde_json::to_string(&TradeKind::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
    }

    #[test]
    fn test_days_until() {
        let start = TimeMs::new(0);
        assert_eq!(start.days_until(TimeMs::new(86_400_000 * 2)), 2.0);
        assert_eq!(start.days_until(start), 0.0);
    }
}
