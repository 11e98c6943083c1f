//! Ledger entries and the trade request that produces them.

use crate::domain::{Decimal, PortfolioId, Symbol, TimeMs, TradeKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable ledger entry. The position set of a portfolio is fully
/// derivable by replaying its transactions in [`Transaction::replay_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub portfolio_id: PortfolioId,
    pub kind: TradeKind,
    pub symbol: Symbol,
    /// Display name for the instrument, if the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub fee: Decimal,
    /// Effective time of the trade.
    pub timestamp: TimeMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Gain or loss realized by a SELL against the average cost at the time it was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
    /// Time the entry was appended; tie-breaker for equal timestamps.
    pub created_at: TimeMs,
}

impl Transaction {
    /// Total amount paid for a BUY (or received for a SELL) before fees.
    pub fn gross_amount(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    /// Sort key used for replay: (timestamp, created_at, id).
    pub fn replay_order(&self) -> (TimeMs, TimeMs, Uuid) {
        (self.timestamp, self.created_at, self.id)
    }
}

/// A raw, unvalidated trade request as received at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTrade {
    pub portfolio_id: Option<PortfolioId>,
    pub kind: String,
    pub symbol: String,
    pub name: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub fee: Option<Decimal>,
    pub timestamp: Option<TimeMs>,
    pub note: Option<String>,
}
