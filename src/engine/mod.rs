//! Pure computation engines for ledger and valuation logic.

pub mod reconciler;
pub mod valuation;

pub use reconciler::{
    LedgerInsert, OversellPolicy, ReconcileError, ReconcileOutcome, Reconciler, Reconciliation,
};
pub use valuation::{
    valuate, AllocationSlice, LedgerTotals, PortfolioAnalytics, PortfolioValuation,
    PositionValuation, PriceBook, PriceSnapshot, RoiSummary, ValuationTotals, TOP_N,
};
