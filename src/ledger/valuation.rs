//! Portfolio valuation against the price store.

use super::{portfolio_not_found, LedgerError};
use crate::db::Repository;
use crate::domain::{PortfolioId, Position, Symbol, TimeMs};
use crate::engine::{valuate, LedgerTotals, PortfolioValuation, PriceBook, PriceSnapshot};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Loads positions, ledger totals and stored prices, then runs the aggregator.
#[derive(Debug, Clone)]
pub struct ValuationService {
    repo: Arc<Repository>,
}

impl ValuationService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn valuate_portfolio(
        &self,
        portfolio_id: PortfolioId,
    ) -> Result<PortfolioValuation, LedgerError> {
        self.valuate_portfolios(&[portfolio_id]).await
    }

    /// One combined valuation across several portfolios.
    ///
    /// Positions keep their portfolio id; totals, allocation and ROI cover
    /// all of them together.
    pub async fn valuate_portfolios(
        &self,
        portfolio_ids: &[PortfolioId],
    ) -> Result<PortfolioValuation, LedgerError> {
        let mut ids = portfolio_ids.to_vec();
        ids.sort();
        ids.dedup();

        let loaded = try_join_all(ids.iter().map(|&id| self.load(id))).await?;

        let mut positions: Vec<Position> = Vec::new();
        let mut totals = LedgerTotals::default();
        for (portfolio_positions, ledger) in loaded {
            positions.extend(portfolio_positions);
            totals.total_fees += ledger.total_fees;
            totals.realized_pnl += ledger.realized_pnl;
        }

        let prices = self.price_book(&positions).await?;
        debug!(
            portfolios = ids.len(),
            positions = positions.len(),
            priced = prices.len(),
            "valuating"
        );
        Ok(valuate(&positions, &prices, totals, TimeMs::now()))
    }

    async fn load(&self, id: PortfolioId) -> Result<(Vec<Position>, LedgerTotals), LedgerError> {
        if self.repo.get_portfolio(id).await?.is_none() {
            return Err(portfolio_not_found(id));
        }
        let positions = self.repo.query_positions(id).await?;
        let totals = self.repo.ledger_totals(id).await?;
        Ok((positions, totals))
    }

    /// Latest stored price per held symbol. Symbols never priced are absent.
    async fn price_book(&self, positions: &[Position]) -> Result<PriceBook, LedgerError> {
        let symbols: Vec<Symbol> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let quotes = self.repo.price_quotes_for_symbols(&symbols).await?;
        Ok(quotes
            .into_iter()
            .map(|q| {
                (
                    q.symbol,
                    PriceSnapshot {
                        price: q.current_price,
                        change_pct_24h: q.change_pct_24h,
                        last_updated: q.last_updated,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_repo;
    use crate::domain::{Decimal, InstrumentKey, NewTrade, PriceQuote};
    use crate::engine::OversellPolicy;
    use crate::ledger::LedgerService;
    use tempfile::TempDir;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn setup() -> (LedgerService, ValuationService, Arc<Repository>, TempDir) {
        let (repo, temp) = setup_repo().await;
        let ledger = LedgerService::new(Arc::clone(&repo), OversellPolicy::Tolerate);
        let valuation = ValuationService::new(Arc::clone(&repo));
        (ledger, valuation, repo, temp)
    }

    async fn buy(ledger: &LedgerService, id: PortfolioId, symbol: &str, qty: &str, px: &str, fee: &str) {
        ledger
            .record_trade(NewTrade {
                portfolio_id: Some(id),
                kind: "BUY".to_string(),
                symbol: symbol.to_string(),
                quantity: d(qty),
                unit_price: d(px),
                fee: Some(d(fee)),
                timestamp: Some(TimeMs::new(1_000)),
                ..NewTrade::default()
            })
            .await
            .unwrap();
    }

    async fn price(repo: &Repository, key: &str, symbol: &str, px: &str, pct: &str) {
        repo.upsert_price_quote(&PriceQuote {
            instrument_key: InstrumentKey::parse(key).unwrap(),
            symbol: Symbol::parse(symbol).unwrap(),
            name: key.to_string(),
            current_price: d(px),
            market_cap: Decimal::zero(),
            volume_24h: Decimal::zero(),
            change_24h: Decimal::zero(),
            change_pct_24h: d(pct),
            last_updated: TimeMs::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_valuation_uses_stored_prices() {
        let (ledger, valuation, repo, _temp) = setup().await;
        let p = ledger.create_portfolio("alice", "Main").await.unwrap();
        buy(&ledger, p.id, "BTC", "0.5", "60000", "10").await;
        buy(&ledger, p.id, "ETH", "10", "3000", "5").await;
        price(&repo, "bitcoin", "BTC", "70000", "2").await;

        let result = valuation.valuate_portfolio(p.id).await.unwrap();
        assert_eq!(result.positions.len(), 2);

        let btc = result.positions.iter().find(|v| v.symbol.as_str() == "BTC").unwrap();
        assert!(btc.price_available);
        assert_eq!(btc.current_value, d("35000"));
        assert_eq!(btc.pnl, d("5000"));

        // no ETH price: valued at zero, never an error
        let eth = result.positions.iter().find(|v| v.symbol.as_str() == "ETH").unwrap();
        assert!(!eth.price_available);
        assert_eq!(eth.current_value, Decimal::zero());

        assert_eq!(result.totals.total_value, d("35000"));
        assert_eq!(result.totals.total_cost, d("60000"));
        assert_eq!(result.totals.total_fees, d("15"));
        assert_eq!(result.totals.change_pct_24h, d("2"));
    }

    #[tokio::test]
    async fn test_combined_valuation_across_portfolios() {
        let (ledger, valuation, repo, _temp) = setup().await;
        let a = ledger.create_portfolio("alice", "A").await.unwrap();
        let b = ledger.create_portfolio("alice", "B").await.unwrap();
        buy(&ledger, a.id, "SOL", "10", "100", "1").await;
        buy(&ledger, b.id, "SOL", "5", "120", "1").await;
        price(&repo, "solana", "SOL", "150", "0").await;

        let result = valuation.valuate_portfolios(&[a.id, b.id, a.id]).await.unwrap();
        assert_eq!(result.positions.len(), 2);
        assert_eq!(result.totals.total_value, d("2250"));
        assert_eq!(result.totals.total_cost, d("1600"));
        assert_eq!(result.totals.total_fees, d("2"));
    }

    #[tokio::test]
    async fn test_unknown_portfolio_fails() {
        let (_ledger, valuation, _repo, _temp) = setup().await;
        let err = valuation
            .valuate_portfolio(PortfolioId::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_portfolio_valuates_to_zero() {
        let (ledger, valuation, _repo, _temp) = setup().await;
        let p = ledger.create_portfolio("alice", "Empty").await.unwrap();
        let result = valuation.valuate_portfolio(p.id).await.unwrap();
        assert!(result.positions.is_empty());
        assert_eq!(result.totals.total_value, Decimal::zero());
        assert_eq!(result.roi.roi_pct, Decimal::zero());
    }
}
