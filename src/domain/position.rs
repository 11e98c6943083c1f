//! Derived current-holdings record per (portfolio, symbol).

use crate::domain::{Decimal, PortfolioId, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current holding for one instrument within one portfolio.
///
/// Invariant: `quantity` is strictly positive. A position whose quantity
/// would drop to zero or below is removed instead of stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: PortfolioId,
    pub symbol: Symbol,
    pub name: String,
    pub quantity: Decimal,
    /// Weighted-average unit cost across all buys.
    pub average_cost: Decimal,
    pub first_transaction_id: Uuid,
    pub last_transaction_id: Uuid,
    /// Timestamp of the trade that opened the position.
    pub opened_at: TimeMs,
    pub updated_at: TimeMs,
}

impl Position {
    /// Quantity × average cost, or None when it is out of range.
    pub fn cost_basis(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.average_cost)
    }
}
