//! Ledger reconciliation: folds trade events into weighted-average-cost positions.
//!
//! Pure computation; callers are responsible for serializing calls per
//! (portfolio, symbol) and persisting the outcome.

use crate::domain::{Decimal, Position, Symbol, Transaction, TradeKind};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// What to do with a SELL that exceeds the current holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversellPolicy {
    /// A SELL without a position is recorded but changes nothing; a SELL larger
    /// than the holding removes the position.
    #[default]
    Tolerate,
    /// Both cases are rejected before anything is written.
    Reject,
}

/// Effect of one transaction on the position set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created(Position),
    Updated(Position),
    /// The position as it was before the removing SELL.
    Removed(Position),
    /// SELL against a symbol with no holding.
    Untouched,
}

impl ReconcileOutcome {
    /// Position after the transaction, if one remains.
    pub fn position(&self) -> Option<&Position> {
        match self {
            ReconcileOutcome::Created(p) | ReconcileOutcome::Updated(p) => Some(p),
            ReconcileOutcome::Removed(_) | ReconcileOutcome::Untouched => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    /// Only set for a SELL applied against an existing position.
    pub realized_pnl: Option<Decimal>,
}

/// Result of inserting one transaction into the ledger of its (portfolio, symbol) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerInsert {
    /// Realized P&L of the new transaction at its effective time.
    pub realized_pnl: Option<Decimal>,
    /// Change to the stored position once every entry is applied in replay order.
    pub outcome: ReconcileOutcome,
    /// Later entries whose realized P&L changed, with the new value.
    pub restated: Vec<(Uuid, Option<Decimal>)>,
    /// Set when existing entries replay after the new one; the stored
    /// position must then be replaced rather than patched.
    pub backdated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("quantity must be greater than zero, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("unit price must not be negative, got {0}")]
    NegativePrice(Decimal),
    #[error("fee must not be negative, got {0}")]
    NegativeFee(Decimal),
    #[error("position {position} does not belong to transaction {transaction}")]
    Mismatch { position: Uuid, transaction: Uuid },
    #[error("no {0} position to sell")]
    NoPosition(Symbol),
    #[error("cannot sell {requested} {symbol}: only {held} held")]
    InsufficientQuantity {
        symbol: Symbol,
        requested: Decimal,
        held: Decimal,
    },
    #[error("{0} trade values are too large to represent")]
    Overflow(Symbol),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    policy: OversellPolicy,
}

impl Reconciler {
    pub fn new(policy: OversellPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OversellPolicy {
        self.policy
    }

    /// Check the value constraints of a transaction.
    pub fn validate(tx: &Transaction) -> Result<(), ReconcileError> {
        if !tx.quantity.is_positive() {
            return Err(ReconcileError::NonPositiveQuantity(tx.quantity));
        }
        if tx.unit_price.is_negative() {
            return Err(ReconcileError::NegativePrice(tx.unit_price));
        }
        if tx.fee.is_negative() {
            return Err(ReconcileError::NegativeFee(tx.fee));
        }
        Ok(())
    }

    /// Apply one transaction to the current position for its (portfolio, symbol).
    ///
    /// All checks run before any state is computed, so an error means nothing
    /// should be written.
    pub fn apply(
        &self,
        current: Option<&Position>,
        tx: &Transaction,
    ) -> Result<Reconciliation, ReconcileError> {
        Self::validate(tx)?;
        if let Some(position) = current {
            if position.portfolio_id != tx.portfolio_id || position.symbol != tx.symbol {
                return Err(ReconcileError::Mismatch {
                    position: position.id,
                    transaction: tx.id,
                });
            }
        }

        match tx.kind {
            TradeKind::Buy => Ok(Reconciliation {
                outcome: self.apply_buy(current, tx)?,
                realized_pnl: None,
            }),
            TradeKind::Sell => self.apply_sell(current, tx),
        }
    }

    fn apply_buy(
        &self,
        current: Option<&Position>,
        tx: &Transaction,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let overflow = || ReconcileError::Overflow(tx.symbol.clone());
        let added_value = tx.quantity.checked_mul(tx.unit_price).ok_or_else(overflow)?;

        let Some(position) = current else {
            return Ok(ReconcileOutcome::Created(Position {
                id: Uuid::new_v4(),
                portfolio_id: tx.portfolio_id,
                symbol: tx.symbol.clone(),
                name: tx
                    .name
                    .clone()
                    .unwrap_or_else(|| tx.symbol.as_str().to_string()),
                quantity: tx.quantity,
                average_cost: tx.unit_price,
                first_transaction_id: tx.id,
                last_transaction_id: tx.id,
                opened_at: tx.timestamp,
                updated_at: tx.created_at,
            }));
        };

        let new_qty = position
            .quantity
            .checked_add(tx.quantity)
            .ok_or_else(overflow)?;
        let total_value = position
            .quantity
            .checked_mul(position.average_cost)
            .and_then(|held_value| held_value.checked_add(added_value))
            .ok_or_else(overflow)?;
        let average_cost = total_value.ratio_or_zero(new_qty);

        let mut updated = position.clone();
        updated.quantity = new_qty;
        updated.average_cost = average_cost;
        updated.last_transaction_id = tx.id;
        updated.updated_at = tx.created_at;
        if let Some(name) = &tx.name {
            updated.name = name.clone();
        }
        Ok(ReconcileOutcome::Updated(updated))
    }

    fn apply_sell(
        &self,
        current: Option<&Position>,
        tx: &Transaction,
    ) -> Result<Reconciliation, ReconcileError> {
        let Some(position) = current else {
            if self.policy == OversellPolicy::Reject {
                return Err(ReconcileError::NoPosition(tx.symbol.clone()));
            }
            return Ok(Reconciliation {
                outcome: ReconcileOutcome::Untouched,
                realized_pnl: None,
            });
        };

        if self.policy == OversellPolicy::Reject && tx.quantity > position.quantity {
            return Err(ReconcileError::InsufficientQuantity {
                symbol: tx.symbol.clone(),
                requested: tx.quantity,
                held: position.quantity,
            });
        }

        let closed_qty = tx.quantity.min(position.quantity);
        let realized_pnl = tx
            .unit_price
            .checked_sub(position.average_cost)
            .and_then(|margin| margin.checked_mul(closed_qty))
            .and_then(|gross| gross.checked_sub(tx.fee))
            .ok_or_else(|| ReconcileError::Overflow(tx.symbol.clone()))?;

        let new_qty = position.quantity - tx.quantity;
        let outcome = if new_qty.is_positive() {
            let mut updated = position.clone();
            updated.quantity = new_qty;
            updated.last_transaction_id = tx.id;
            updated.updated_at = tx.created_at;
            ReconcileOutcome::Updated(updated)
        } else {
            ReconcileOutcome::Removed(position.clone())
        };

        Ok(Reconciliation {
            outcome,
            realized_pnl: Some(realized_pnl),
        })
    }

    /// Insert `tx` into the ledger of its pair.
    ///
    /// `current` is the stored position and `history` the recorded entries of
    /// the pair. A transaction dated before existing entries is applied to the
    /// state at its effective time, then every later entry is re-applied on top
    /// under the same policy. An error means nothing should be written.
    pub fn insert(
        &self,
        current: Option<&Position>,
        history: &[Transaction],
        tx: &Transaction,
    ) -> Result<LedgerInsert, ReconcileError> {
        let order = tx.replay_order();
        let pair = history
            .iter()
            .filter(|entry| entry.portfolio_id == tx.portfolio_id && entry.symbol == tx.symbol);

        let mut later: Vec<&Transaction> = pair
            .clone()
            .filter(|entry| entry.replay_order() > order)
            .collect();
        if later.is_empty() {
            let reconciliation = self.apply(current, tx)?;
            return Ok(LedgerInsert {
                realized_pnl: reconciliation.realized_pnl,
                outcome: reconciliation.outcome,
                restated: Vec::new(),
                backdated: false,
            });
        }
        later.sort_by_key(|entry| entry.replay_order());

        let earlier = pair.filter(|entry| entry.replay_order() < order);
        let at_time = Self::replay(earlier)?.remove(&tx.symbol);
        let reconciliation = self.apply(at_time.as_ref(), tx)?;

        let mut state = reconciliation.outcome.position().cloned();
        let mut restated = Vec::new();
        for entry in later {
            let result = self.apply(state.as_ref(), entry)?;
            if result.realized_pnl != entry.realized_pnl {
                restated.push((entry.id, result.realized_pnl));
            }
            state = result.outcome.position().cloned();
        }

        let outcome = match (current, state) {
            (None, Some(position)) => ReconcileOutcome::Created(position),
            (Some(previous), Some(mut position)) => {
                position.id = previous.id;
                ReconcileOutcome::Updated(position)
            }
            (Some(previous), None) => ReconcileOutcome::Removed(previous.clone()),
            (None, None) => ReconcileOutcome::Untouched,
        };
        Ok(LedgerInsert {
            realized_pnl: reconciliation.realized_pnl,
            outcome,
            restated,
            backdated: true,
        })
    }

    /// Rebuild the position set of one portfolio from its full ledger.
    ///
    /// Entries are already accepted ledger history, so replay always tolerates
    /// oversells regardless of the configured policy.
    pub fn replay<'a, I>(transactions: I) -> Result<BTreeMap<Symbol, Position>, ReconcileError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut ordered: Vec<&Transaction> = transactions.into_iter().collect();
        ordered.sort_by_key(|tx| tx.replay_order());

        let reconciler = Reconciler::new(OversellPolicy::Tolerate);
        let mut positions: BTreeMap<Symbol, Position> = BTreeMap::new();
        for tx in ordered {
            let result = reconciler.apply(positions.get(&tx.symbol), tx)?;
            match result.outcome {
                ReconcileOutcome::Created(p) | ReconcileOutcome::Updated(p) => {
                    positions.insert(p.symbol.clone(), p);
                }
                ReconcileOutcome::Removed(p) => {
                    positions.remove(&p.symbol);
                }
                ReconcileOutcome::Untouched => {}
            }
        }
        Ok(positions)
    }
}
