//! Valuation and analytics over positions and the latest known prices.
//!
//! Read-only arithmetic. Every ratio goes through [`Decimal::ratio_or_zero`]
//! so empty portfolios, zero cost bases and missing prices yield zeros.
//! Products and sums that leave the decimal range also count as zero.

use crate::domain::{Decimal, PortfolioId, Position, Symbol, TimeMs};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Price data for one symbol as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub price: Decimal,
    pub change_pct_24h: Decimal,
    pub last_updated: TimeMs,
}

/// Latest prices keyed by canonical symbol.
pub type PriceBook = HashMap<Symbol, PriceSnapshot>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionValuation {
    pub portfolio_id: PortfolioId,
    pub symbol: Symbol,
    pub name: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub current_price: Decimal,
    pub current_value: Decimal,
    pub cost_basis: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub change_pct_24h: Decimal,
    /// Value change attributable to the last 24h move.
    pub change_24h_value: Decimal,
    pub allocation_pct: Decimal,
    /// False when no quote has ever been fetched for the symbol.
    pub price_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_updated_at: Option<TimeMs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationTotals {
    pub total_value: Decimal,
    pub total_cost: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    /// Value-weighted average of the positions' 24h percentage change.
    pub change_pct_24h: Decimal,
    pub change_24h_value: Decimal,
    pub total_fees: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiSummary {
    pub invested: Decimal,
    pub current_value: Decimal,
    pub total_fees: Decimal,
    pub roi_pct: Decimal,
    pub days_held: Decimal,
    pub annualized_roi_pct: Decimal,
}

/// How many rows each ranked list in [`PortfolioAnalytics`] holds at most.
pub const TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSlice {
    pub symbol: Symbol,
    pub allocation_pct: Decimal,
}

/// Rankings and allocation derived from the position rows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAnalytics {
    /// Positive P&L, largest first.
    pub top_winners: Vec<PositionValuation>,
    /// Negative P&L, most negative first.
    pub top_losers: Vec<PositionValuation>,
    /// Largest current value first.
    pub top_holdings: Vec<PositionValuation>,
    /// Allocation per symbol, summed across portfolios, largest first.
    pub allocation: Vec<AllocationSlice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioValuation {
    pub positions: Vec<PositionValuation>,
    pub totals: ValuationTotals,
    pub roi: RoiSummary,
    pub analytics: PortfolioAnalytics,
    pub as_of: TimeMs,
}

/// Ledger-side amounts the aggregator cannot derive from positions alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerTotals {
    pub total_fees: Decimal,
    pub realized_pnl: Decimal,
}

/// Value a set of positions against a price book.
pub fn valuate(
    positions: &[Position],
    prices: &PriceBook,
    ledger: LedgerTotals,
    now: TimeMs,
) -> PortfolioValuation {
    let mut rows: Vec<PositionValuation> = positions
        .iter()
        .map(|position| value_position(position, prices.get(&position.symbol)))
        .collect();

    let total_value = sum_or_zero(rows.iter().map(|r| r.current_value));
    let total_cost = sum_or_zero(rows.iter().map(|r| r.cost_basis));
    let total_pnl = total_value.checked_sub(total_cost).unwrap_or_default();
    let weighted_change = sum_or_zero(
        rows.iter()
            .map(|r| r.current_value.checked_mul(r.change_pct_24h).unwrap_or_default()),
    );

    for row in &mut rows {
        row.allocation_pct = row.current_value.percent_of(total_value);
    }

    let totals = ValuationTotals {
        total_value,
        total_cost,
        total_pnl,
        total_pnl_pct: total_pnl.percent_of(total_cost),
        change_pct_24h: weighted_change.ratio_or_zero(total_value),
        change_24h_value: sum_or_zero(rows.iter().map(|r| r.change_24h_value)),
        total_fees: ledger.total_fees,
        realized_pnl: ledger.realized_pnl,
    };

    let earliest = positions.iter().map(|p| p.opened_at).min();
    let roi = compute_roi(total_value, total_cost, ledger.total_fees, earliest, now);

    let (top_winners, top_losers) = top_movers(&rows, TOP_N);
    let analytics = PortfolioAnalytics {
        top_winners,
        top_losers,
        top_holdings: top_holdings(&rows, TOP_N),
        allocation: allocation(&rows),
    };

    PortfolioValuation {
        positions: rows,
        totals,
        roi,
        analytics,
        as_of: now,
    }
}

fn sum_or_zero(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    Decimal::checked_sum(values).unwrap_or_default()
}

fn value_position(position: &Position, price: Option<&PriceSnapshot>) -> PositionValuation {
    let current_price = price.map(|p| p.price).unwrap_or_default();
    let change_pct_24h = price.map(|p| p.change_pct_24h).unwrap_or_default();
    let current_value = position
        .quantity
        .checked_mul(current_price)
        .unwrap_or_default();
    let cost_basis = position.cost_basis().unwrap_or_default();
    let pnl = current_value.checked_sub(cost_basis).unwrap_or_default();
    let change_24h_value = current_value
        .checked_mul(change_pct_24h.ratio_or_zero(Decimal::hundred()))
        .unwrap_or_default();

    PositionValuation {
        portfolio_id: position.portfolio_id,
        symbol: position.symbol.clone(),
        name: position.name.clone(),
        quantity: position.quantity,
        average_cost: position.average_cost,
        current_price,
        current_value,
        cost_basis,
        pnl,
        pnl_pct: pnl.percent_of(cost_basis),
        change_pct_24h,
        change_24h_value,
        allocation_pct: Decimal::zero(),
        price_available: price.is_some(),
        price_updated_at: price.map(|p| p.last_updated),
    }
}

/// Simplified ROI: `(value − invested − fees) / invested`, annualized linearly.
pub fn compute_roi(
    current_value: Decimal,
    invested: Decimal,
    total_fees: Decimal,
    earliest_trade: Option<TimeMs>,
    now: TimeMs,
) -> RoiSummary {
    let roi_pct = current_value
        .checked_sub(invested)
        .and_then(|gain| gain.checked_sub(total_fees))
        .unwrap_or_default()
        .percent_of(invested);

    let days_held = earliest_trade
        .map(|start| start.days_until(now))
        .and_then(Decimal::from_f64)
        .filter(|days| days.is_positive())
        .unwrap_or_default();
    let annualized_roi_pct = roi_pct
        .checked_mul(Decimal::from(365_i64))
        .unwrap_or_default()
        .ratio_or_zero(days_held);

    RoiSummary {
        invested,
        current_value,
        total_fees,
        roi_pct,
        days_held: days_held.round_dp(4),
        annualized_roi_pct,
    }
}

/// Best and worst rows by absolute P&L, at most `n` each.
fn top_movers(
    rows: &[PositionValuation],
    n: usize,
) -> (Vec<PositionValuation>, Vec<PositionValuation>) {
    let mut winners: Vec<&PositionValuation> =
        rows.iter().filter(|p| p.pnl.is_positive()).collect();
    winners.sort_by(|a, b| b.pnl.cmp(&a.pnl).then_with(|| a.symbol.cmp(&b.symbol)));

    let mut losers: Vec<&PositionValuation> =
        rows.iter().filter(|p| p.pnl.is_negative()).collect();
    losers.sort_by(|a, b| a.pnl.cmp(&b.pnl).then_with(|| a.symbol.cmp(&b.symbol)));

    (
        winners.into_iter().take(n).cloned().collect(),
        losers.into_iter().take(n).cloned().collect(),
    )
}

fn top_holdings(rows: &[PositionValuation], n: usize) -> Vec<PositionValuation> {
    let mut holdings: Vec<&PositionValuation> = rows.iter().collect();
    holdings.sort_by(|a, b| match b.current_value.cmp(&a.current_value) {
        Ordering::Equal => a.symbol.cmp(&b.symbol),
        other => other,
    });
    holdings.into_iter().take(n).cloned().collect()
}

fn allocation(rows: &[PositionValuation]) -> Vec<AllocationSlice> {
    let mut by_symbol: HashMap<&Symbol, Decimal> = HashMap::new();
    for row in rows {
        let pct = by_symbol.entry(&row.symbol).or_default();
        *pct = pct.checked_add(row.allocation_pct).unwrap_or(*pct);
    }
    let mut allocation: Vec<AllocationSlice> = by_symbol
        .into_iter()
        .map(|(symbol, allocation_pct)| AllocationSlice {
            symbol: symbol.clone(),
            allocation_pct,
        })
        .collect();
    allocation.sort_by(|a, b| {
        b.allocation_pct
            .cmp(&a.allocation_pct)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    allocation
}
