//! Ledger service: portfolios, trade recording and position maintenance.
//!
//! Every trade is appended and reconciled inside one database transaction
//! while holding the lock for its (portfolio, symbol) pair, so concurrent
//! trades on one pair are applied one at a time and never lose updates.
//! Position rebuilds and portfolio deletion take the whole portfolio
//! exclusively.

pub mod locks;
pub mod valuation;

pub use locks::KeyedLocks;
pub use valuation::ValuationService;

use crate::db::Repository;
use crate::domain::{
    NewTrade, Portfolio, PortfolioId, Position, Symbol, TimeMs, TradeKind, Transaction,
};
use crate::engine::{OversellPolicy, ReconcileError, ReconcileOutcome, Reconciler};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<ReconcileError> for LedgerError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Mismatch { .. } => LedgerError::Conflict(e.to_string()),
            _ => LedgerError::Validation(e.to_string()),
        }
    }
}

fn portfolio_not_found(id: PortfolioId) -> LedgerError {
    LedgerError::NotFound(format!("portfolio {} not found", id))
}

/// How a recorded trade changed the position set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionEffect {
    Created,
    Updated,
    Removed,
    Untouched,
}

/// Result of recording one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeReceipt {
    pub transaction: Transaction,
    pub effect: PositionEffect,
    /// The position after the trade, if one remains.
    pub position: Option<Position>,
}

#[derive(Debug)]
pub struct LedgerService {
    repo: Arc<Repository>,
    reconciler: Reconciler,
    pair_locks: KeyedLocks<(PortfolioId, Symbol)>,
    portfolio_locks: KeyedLocks<PortfolioId>,
}

impl LedgerService {
    pub fn new(repo: Arc<Repository>, policy: OversellPolicy) -> Self {
        Self {
            repo,
            reconciler: Reconciler::new(policy),
            pair_locks: KeyedLocks::new(),
            portfolio_locks: KeyedLocks::new(),
        }
    }

    pub fn oversell_policy(&self) -> OversellPolicy {
        self.reconciler.policy()
    }

    // =========================================================================
    // Portfolios
    // =========================================================================

    pub async fn create_portfolio(&self, owner: &str, name: &str) -> Result<Portfolio, LedgerError> {
        let owner = required_text("owner", owner)?;
        let name = required_text("name", name)?;
        let portfolio = Portfolio::new(owner, name);

        match self.repo.insert_portfolio(&portfolio).await {
            Ok(()) => {
                info!(portfolio = %portfolio.id, owner = %portfolio.owner, "portfolio created");
                Ok(portfolio)
            }
            Err(e) if is_unique_violation(&e) => Err(LedgerError::Conflict(format!(
                "portfolio {:?} already exists for owner {}",
                portfolio.name, portfolio.owner
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the owner's portfolio with this name, creating it if missing.
    pub async fn get_or_create_portfolio(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Portfolio, LedgerError> {
        let owner = required_text("owner", owner)?;
        let name = required_text("name", name)?;
        if let Some(existing) = self.repo.find_portfolio(&owner, &name).await? {
            return Ok(existing);
        }
        match self.create_portfolio(&owner, &name).await {
            // lost a creation race
            Err(LedgerError::Conflict(_)) => self
                .repo
                .find_portfolio(&owner, &name)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("portfolio {:?} not found", name))),
            other => other,
        }
    }

    pub async fn portfolio(&self, id: PortfolioId) -> Result<Portfolio, LedgerError> {
        self.repo
            .get_portfolio(id)
            .await?
            .ok_or_else(|| portfolio_not_found(id))
    }

    pub async fn portfolios_for_owner(&self, owner: &str) -> Result<Vec<Portfolio>, LedgerError> {
        let owner = required_text("owner", owner)?;
        Ok(self.repo.portfolios_for_owner(&owner).await?)
    }

    /// Delete a portfolio with all its transactions and positions.
    pub async fn delete_portfolio(&self, id: PortfolioId) -> Result<(), LedgerError> {
        let _portfolio = self.portfolio_locks.lock(id).await;
        if self.repo.delete_portfolio(id).await? {
            info!(portfolio = %id, "portfolio deleted");
            Ok(())
        } else {
            Err(portfolio_not_found(id))
        }
    }

    // =========================================================================
    // Trades
    // =========================================================================

    /// Validate, append and reconcile one trade.
    ///
    /// A rejected trade leaves no trace: neither the transaction nor any
    /// position change is written. A trade dated before existing entries of its
    /// pair is judged against the position at its effective time; later
    /// entries are re-applied and their realized P&L restated.
    pub async fn record_trade(&self, trade: NewTrade) -> Result<TradeReceipt, LedgerError> {
        let transaction = self.build_transaction(trade)?;
        let portfolio_id = transaction.portfolio_id;
        let symbol = transaction.symbol.clone();

        let _portfolio = self.portfolio_locks.lock_shared(portfolio_id).await;
        self.portfolio(portfolio_id).await?;
        let _pair = self.pair_locks.lock((portfolio_id, symbol.clone())).await;

        let reconciler = self.reconciler;
        let insert = self
            .repo
            .apply_trade_atomic(&transaction, |current, history| {
                reconciler
                    .insert(current, history, &transaction)
                    .map_err(LedgerError::from)
            })
            .await
            .map_err(|e| match e {
                LedgerError::Db(e) if is_foreign_key_violation(&e) => portfolio_not_found(portfolio_id),
                other => other,
            })?;

        let effect = match &insert.outcome {
            ReconcileOutcome::Created(_) => PositionEffect::Created,
            ReconcileOutcome::Updated(_) => PositionEffect::Updated,
            ReconcileOutcome::Removed(_) => PositionEffect::Removed,
            ReconcileOutcome::Untouched => PositionEffect::Untouched,
        };
        let position = insert.outcome.position().cloned();

        if insert.backdated {
            warn!(
                portfolio = %portfolio_id,
                symbol = %symbol,
                timestamp = transaction.timestamp.as_ms(),
                restated = insert.restated.len(),
                "backdated trade, symbol ledger replayed"
            );
        }

        let mut transaction = transaction;
        transaction.realized_pnl = insert.realized_pnl;

        info!(
            portfolio = %portfolio_id,
            symbol = %symbol,
            kind = transaction.kind.as_str(),
            quantity = %transaction.quantity,
            unit_price = %transaction.unit_price,
            effect = ?effect,
            "trade recorded"
        );

        Ok(TradeReceipt {
            transaction,
            effect,
            position,
        })
    }

    fn build_transaction(&self, trade: NewTrade) -> Result<Transaction, LedgerError> {
        let portfolio_id = trade
            .portfolio_id
            .ok_or_else(|| LedgerError::Validation("portfolioId is required".to_string()))?;
        let kind = TradeKind::from_str(&trade.kind)
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let symbol =
            Symbol::parse(&trade.symbol).map_err(|e| LedgerError::Validation(e.to_string()))?;

        let now = TimeMs::now();
        let timestamp = trade.timestamp.unwrap_or(now);
        if timestamp.as_ms() < 0 {
            return Err(LedgerError::Validation(
                "timestamp must not be negative".to_string(),
            ));
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            portfolio_id,
            kind,
            symbol,
            name: non_empty(trade.name),
            quantity: trade.quantity,
            unit_price: trade.unit_price,
            fee: trade.fee.unwrap_or_default(),
            timestamp,
            note: non_empty(trade.note),
            realized_pnl: None,
            created_at: now,
        };
        Reconciler::validate(&transaction)?;
        Ok(transaction)
    }

    // =========================================================================
    // Reads and repair
    // =========================================================================

    pub async fn positions(&self, portfolio_id: PortfolioId) -> Result<Vec<Position>, LedgerError> {
        self.portfolio(portfolio_id).await?;
        Ok(self.repo.query_positions(portfolio_id).await?)
    }

    pub async fn position(
        &self,
        portfolio_id: PortfolioId,
        symbol: &str,
    ) -> Result<Option<Position>, LedgerError> {
        let symbol = Symbol::parse(symbol).map_err(|e| LedgerError::Validation(e.to_string()))?;
        self.portfolio(portfolio_id).await?;
        Ok(self.repo.get_position(portfolio_id, &symbol).await?)
    }

    /// Ledger entries in replay order, optionally for one symbol.
    pub async fn transactions(
        &self,
        portfolio_id: PortfolioId,
        symbol: Option<&str>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let symbol = symbol
            .map(Symbol::parse)
            .transpose()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        self.portfolio(portfolio_id).await?;
        Ok(self
            .repo
            .query_transactions(portfolio_id, symbol.as_ref())
            .await?)
    }

    /// Recompute every position of a portfolio from its ledger and store the result.
    pub async fn rebuild_positions(
        &self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, LedgerError> {
        let _portfolio = self.portfolio_locks.lock(portfolio_id).await;
        self.portfolio(portfolio_id).await?;

        let transactions = self.repo.query_transactions(portfolio_id, None).await?;
        let positions: Vec<Position> = Reconciler::replay(&transactions)?.into_values().collect();
        self.repo.replace_positions(portfolio_id, &positions).await?;

        info!(
            portfolio = %portfolio_id,
            transactions = transactions.len(),
            positions = positions.len(),
            "positions rebuilt"
        );
        Ok(positions)
    }
}

fn required_text(field: &str, value: &str) -> Result<String, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_repo;
    use crate::domain::Decimal;
    use tempfile::TempDir;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn setup(policy: OversellPolicy) -> (LedgerService, Portfolio, TempDir) {
        let (repo, temp) = setup_repo().await;
        let service = LedgerService::new(repo, policy);
        let portfolio = service.create_portfolio("alice", "Main").await.unwrap();
        (service, portfolio, temp)
    }

    fn trade(portfolio: &Portfolio, kind: &str, symbol: &str, qty: &str, px: &str, ts: i64) -> NewTrade {
        NewTrade {
            portfolio_id: Some(portfolio.id),
            kind: kind.to_string(),
            symbol: symbol.to_string(),
            name: None,
            quantity: d(qty),
            unit_price: d(px),
            fee: None,
            timestamp: Some(TimeMs::new(ts)),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_btc_worked_example() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;

        let r1 = service.record_trade(trade(&p, "buy", " btc ", "0.5", "65000", 1)).await.unwrap();
        assert_eq!(r1.effect, PositionEffect::Created);
        assert_eq!(r1.transaction.symbol.as_str(), "BTC");
        assert_eq!(r1.transaction.kind, TradeKind::Buy);

        let r2 = service.record_trade(trade(&p, "BUY", "BTC", "0.3", "68000", 2)).await.unwrap();
        let position = r2.position.unwrap();
        assert_eq!(position.quantity, d("0.8"));
        assert_eq!(position.average_cost, d("66125"));

        let r3 = service.record_trade(trade(&p, "sell", "BTC", "0.3", "70000", 3)).await.unwrap();
        assert_eq!(r3.effect, PositionEffect::Updated);
        assert_eq!(r3.transaction.realized_pnl, Some(d("1162.5")));
        let position = r3.position.unwrap();
        assert_eq!(position.quantity, d("0.5"));
        assert_eq!(position.average_cost, d("66125"));

        let r4 = service.record_trade(trade(&p, "SELL", "BTC", "0.5", "71000", 4)).await.unwrap();
        assert_eq!(r4.effect, PositionEffect::Removed);
        assert!(r4.position.is_none());
        assert!(service.positions(p.id).await.unwrap().is_empty());
        assert_eq!(service.transactions(p.id, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_validation_errors_write_nothing() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;

        for bad in [
            trade(&p, "hold", "BTC", "1", "1", 1),
            trade(&p, "buy", "  ", "1", "1", 1),
            trade(&p, "buy", "BTC", "0", "1", 1),
            trade(&p, "buy", "BTC", "1", "-1", 1),
            NewTrade {
                fee: Some(d("-1")),
                ..trade(&p, "buy", "BTC", "1", "1", 1)
            },
            NewTrade {
                portfolio_id: None,
                ..trade(&p, "buy", "BTC", "1", "1", 1)
            },
        ] {
            let err = service.record_trade(bad).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");
        }
        assert!(service.transactions(p.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_portfolio_is_not_found() {
        let (service, _p, _temp) = setup(OversellPolicy::Tolerate).await;
        let ghost = Portfolio::new("bob".to_string(), "ghost".to_string());
        let err = service
            .record_trade(trade(&ghost, "buy", "BTC", "1", "1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tolerated_sell_without_position() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        let receipt = service
            .record_trade(trade(&p, "sell", "ETH", "1", "3000", 1))
            .await
            .unwrap();
        assert_eq!(receipt.effect, PositionEffect::Untouched);
        assert_eq!(receipt.transaction.realized_pnl, None);
        assert_eq!(service.transactions(p.id, Some("eth")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_oversell_writes_nothing() {
        let (service, p, _temp) = setup(OversellPolicy::Reject).await;
        service
            .record_trade(trade(&p, "buy", "ETH", "1", "3000", 1))
            .await
            .unwrap();

        let err = service
            .record_trade(trade(&p, "sell", "ETH", "2", "3100", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(service.transactions(p.id, None).await.unwrap().len(), 1);
        let position = service.position(p.id, "ETH").await.unwrap().unwrap();
        assert_eq!(position.quantity, d("1"));
    }

    #[tokio::test]
    async fn test_concurrent_trades_lose_no_updates() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = Arc::clone(&service);
            let t = trade(&p, "buy", "SOL", "1", &format!("{}", 100 + i), i);
            handles.push(tokio::spawn(async move { service.record_trade(t).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let position = service.position(p.id, "SOL").await.unwrap().unwrap();
        assert_eq!(position.quantity, d("20"));
        // mean of 100..=119, whatever order the trades landed in
        assert_eq!(position.average_cost.round_dp(8), d("109.5"));
        assert_eq!(service.transactions(p.id, None).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_backdated_trade_realigns_position() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        service.record_trade(trade(&p, "buy", "BTC", "1", "100", 10)).await.unwrap();
        service.record_trade(trade(&p, "sell", "BTC", "1", "150", 20)).await.unwrap();

        // a buy effective before the sell: replay keeps 1 @ 150 after the sell
        let receipt = service
            .record_trade(trade(&p, "buy", "BTC", "1", "200", 15))
            .await
            .unwrap();
        assert_eq!(receipt.effect, PositionEffect::Created);
        let position = receipt.position.unwrap();
        assert_eq!(position.quantity, d("1"));
        assert_eq!(position.average_cost, d("150"));

        let stored = service.positions(p.id).await.unwrap();
        assert_eq!(stored, vec![position]);

        // the later sell now closes a unit bought at the 150 average
        let ledger = service.transactions(p.id, Some("BTC")).await.unwrap();
        assert_eq!(ledger[2].kind, TradeKind::Sell);
        assert_eq!(ledger[2].realized_pnl, Some(d("0")));
        let totals = service.repo.ledger_totals(p.id).await.unwrap();
        assert_eq!(totals.realized_pnl, d("0"));
    }

    #[tokio::test]
    async fn test_backdated_sell_checked_at_effective_time() {
        let (service, p, _temp) = setup(OversellPolicy::Reject).await;
        service.record_trade(trade(&p, "buy", "BTC", "1", "100", 10)).await.unwrap();

        let err = service
            .record_trade(trade(&p, "sell", "BTC", "1", "90", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");
        assert_eq!(service.transactions(p.id, None).await.unwrap().len(), 1);
        let position = service.position(p.id, "BTC").await.unwrap().unwrap();
        assert_eq!(position.quantity, d("1"));
    }

    #[tokio::test]
    async fn test_backdated_sell_reports_realigned_effect() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        service.record_trade(trade(&p, "buy", "BTC", "2", "100", 10)).await.unwrap();
        service.record_trade(trade(&p, "buy", "BTC", "2", "200", 30)).await.unwrap();

        // sells one of the two units held at ts=20; the later buy still lands
        let receipt = service
            .record_trade(trade(&p, "sell", "BTC", "1", "130", 20))
            .await
            .unwrap();
        assert_eq!(receipt.effect, PositionEffect::Updated);
        assert_eq!(receipt.transaction.realized_pnl, Some(d("30")));
        let position = receipt.position.unwrap();
        assert_eq!(position.quantity, d("3"));
        assert_eq!(position.average_cost.round_dp(8), d("166.66666667"));
        assert_eq!(service.positions(p.id).await.unwrap(), vec![position]);
    }

    #[tokio::test]
    async fn test_overflowing_trade_writes_nothing() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        let err = service
            .record_trade(trade(&p, "buy", "BTC", "1000000000000000", "1000000000000000", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");

        service.record_trade(trade(&p, "buy", "BTC", "1000000000000000", "10000000000000", 1)).await.unwrap();
        let err = service
            .record_trade(trade(&p, "buy", "BTC", "1000000000000000", "70000000000000", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");
        assert_eq!(service.transactions(p.id, None).await.unwrap().len(), 1);
        let position = service.position(p.id, "BTC").await.unwrap().unwrap();
        assert_eq!(position.average_cost, d("10000000000000"));
    }

    #[tokio::test]
    async fn test_rebuild_matches_incremental_state() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;
        service.record_trade(trade(&p, "buy", "BTC", "0.5", "65000", 1)).await.unwrap();
        service.record_trade(trade(&p, "buy", "ETH", "2", "3000", 2)).await.unwrap();
        service.record_trade(trade(&p, "buy", "BTC", "0.3", "68000", 3)).await.unwrap();
        service.record_trade(trade(&p, "sell", "ETH", "0.5", "3500", 4)).await.unwrap();

        let incremental = service.positions(p.id).await.unwrap();
        let rebuilt = service.rebuild_positions(p.id).await.unwrap();

        assert_eq!(incremental.len(), rebuilt.len());
        for (a, b) in incremental.iter().zip(&rebuilt) {
            assert_eq!(a.symbol, b.symbol);
            assert_eq!(a.quantity, b.quantity);
            assert_eq!(a.average_cost, b.average_cost);
            assert_eq!(a.opened_at, b.opened_at);
        }
    }

    #[tokio::test]
    async fn test_portfolio_lifecycle() {
        let (service, p, _temp) = setup(OversellPolicy::Tolerate).await;

        let err = service.create_portfolio("alice", " Main ").await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let same = service.get_or_create_portfolio("alice", "Main").await.unwrap();
        assert_eq!(same.id, p.id);
        let other = service.get_or_create_portfolio("alice", "Trading").await.unwrap();
        assert_ne!(other.id, p.id);
        assert_eq!(service.portfolios_for_owner("alice").await.unwrap().len(), 2);

        service.record_trade(trade(&p, "buy", "BTC", "1", "1", 1)).await.unwrap();
        service.delete_portfolio(p.id).await.unwrap();
        assert!(matches!(
            service.positions(p.id).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_portfolio(p.id).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
