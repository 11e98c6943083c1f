pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod marketdata;
pub mod sync;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Decimal, InstrumentKey, NewTrade, Portfolio, PortfolioId, Position, PriceQuote, Symbol,
    TimeMs, TrackedInstrument, TradeKind, Transaction,
};
pub use error::AppError;
pub use ledger::{LedgerError, LedgerService, ValuationService};
pub use marketdata::{
    CoinGeckoClient, MarketDataClient, MarketDataError, MockMarketDataClient, QuoteService,
};
pub use sync::PriceSyncService;
