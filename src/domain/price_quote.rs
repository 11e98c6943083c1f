//! Latest known market data per tracked instrument.

use crate::domain::{Decimal, InstrumentKey, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// One row of the price store, refreshed by the synchronization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub instrument_key: InstrumentKey,
    pub symbol: Symbol,
    pub name: String,
    pub current_price: Decimal,
    pub market_cap: Decimal,
    pub volume_24h: Decimal,
    /// Absolute price change over the last 24h.
    pub change_24h: Decimal,
    /// Percentage price change over the last 24h (5.0 means +5%).
    pub change_pct_24h: Decimal,
    pub last_updated: TimeMs,
}

impl PriceQuote {
    /// True if the quote is younger than `max_age_ms` at `now`. A zero age never is.
    pub fn is_fresh(&self, now: TimeMs, max_age_ms: i64) -> bool {
        now.as_ms() - self.last_updated.as_ms() < max_age_ms
    }
}

/// An instrument in the synchronization universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedInstrument {
    pub instrument_key: InstrumentKey,
    pub symbol: Symbol,
    pub name: String,
    pub active: bool,
}
