//! Market data abstraction: batch prices, instrument detail, search, trending
//! and price history from an external provider.

use crate::domain::{Decimal, InstrumentKey, TimeMs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod coingecko;
pub mod mock;
pub mod quotes;

pub use coingecko::CoinGeckoClient;
pub use mock::MockMarketDataClient;
pub use quotes::{QuoteError, QuoteService, SymbolQuote};

/// Latest market figures for one instrument, as returned by a batch price call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrice {
    pub instrument_key: InstrumentKey,
    pub price: Decimal,
    pub market_cap: Decimal,
    pub volume_24h: Decimal,
    /// Absolute price change over 24h, derived from the percentage.
    pub change_24h: Decimal,
    pub change_pct_24h: Decimal,
}

/// Batch price result keyed by instrument. Unknown instruments are absent.
pub type PriceBatch = HashMap<InstrumentKey, MarketPrice>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentDetail {
    pub instrument_key: InstrumentKey,
    pub symbol: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub current_price: Decimal,
    pub market_cap: Decimal,
    pub volume_24h: Decimal,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub change_pct_24h: Decimal,
    pub circulating_supply: Option<Decimal>,
    pub total_supply: Option<Decimal>,
    pub all_time_high: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub instrument_key: InstrumentKey,
    pub symbol: String,
    pub name: String,
    pub market_cap_rank: Option<u32>,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingInstrument {
    pub instrument_key: InstrumentKey,
    pub symbol: String,
    pub name: String,
    pub market_cap_rank: Option<u32>,
    pub price_btc: Option<Decimal>,
    /// Position in the trending list, 0 is hottest.
    pub score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub timestamp: TimeMs,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    pub instrument_key: InstrumentKey,
    pub days: u32,
    pub prices: Vec<PricePoint>,
    pub market_caps: Vec<PricePoint>,
    pub volumes: Vec<PricePoint>,
}

/// Market data provider.
///
/// Implementations own transport concerns (timeouts, authentication, retry);
/// every failure is reported as a [`MarketDataError`].
#[async_trait]
pub trait MarketDataClient: Send + Sync + fmt::Debug {
    /// Fetch current prices for all `ids` in one upstream request.
    ///
    /// Instruments the provider does not know are omitted from the batch.
    async fn fetch_prices(&self, ids: &[InstrumentKey]) -> Result<PriceBatch, MarketDataError>;

    async fn fetch_detail(&self, id: &InstrumentKey) -> Result<InstrumentDetail, MarketDataError>;

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, MarketDataError>;

    async fn trending(&self) -> Result<Vec<TrendingInstrument>, MarketDataError>;

    /// Price, market cap and volume series over the last `days` days.
    async fn fetch_history(
        &self,
        id: &InstrumentKey,
        days: u32,
    ) -> Result<PriceHistory, MarketDataError>;
}

/// Error type for market data operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    /// Connection failure, DNS failure, reset
    Network(String),
    /// The request exceeded the client timeout
    Timeout,
    /// Non-success HTTP status
    Http { status: u16, message: String },
    /// Malformed or unexpected response body
    Parse(String),
    /// HTTP 429 from the provider
    RateLimited,
}

impl MarketDataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MarketDataError::Http { status: 404, .. })
    }
}

impl fmt::Display for MarketDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataError::Network(msg) => write!(f, "Network error: {}", msg),
            MarketDataError::Timeout => write!(f, "Request timed out"),
            MarketDataError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            MarketDataError::Parse(msg) => write!(f, "Parse error: {}", msg),
            MarketDataError::RateLimited => write!(f, "Rate limited"),
        }
    }
}

impl std::error::Error for MarketDataError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_error_display() {
        let err = MarketDataError::Network("connection reset".to_string());
        assert_eq!(err.to_string(), "Network error: connection reset");

        let err = MarketDataError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Service Unavailable");

        assert_eq!(MarketDataError::Timeout.to_string(), "Request timed out");
        assert_eq!(MarketDataError::RateLimited.to_string(), "Rate limited");
    }

    #[test]
    fn test_is_not_found() {
        let err = MarketDataError::Http {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!MarketDataError::Timeout.is_not_found());
    }
}
