//! Domain types for the portfolio ledger and price store.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, PortfolioId, Symbol, InstrumentKey, TradeKind
//! - Ledger records: Portfolio, Transaction, Position
//! - Market records: PriceQuote, TrackedInstrument

pub mod decimal;
pub mod portfolio;
pub mod position;
pub mod price_quote;
pub mod primitives;
pub mod transaction;

pub use decimal::Decimal;
pub use portfolio::Portfolio;
pub use position::Position;
pub use price_quote::{PriceQuote, TrackedInstrument};
pub use primitives::{InstrumentKey, PortfolioId, PrimitiveParseError, Symbol, TimeMs, TradeKind};
pub use transaction::{NewTrade, Transaction};
