//! SQLite persistence: the ledger (portfolios, transactions, positions) and
//! the price store (quotes, tracked instruments).

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
