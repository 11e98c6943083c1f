//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `ledger.rs` - Portfolios, transactions, positions and the atomic trade write
//! - `prices.rs` - Price store and tracked-instrument universe

mod ledger;
mod prices;

use crate::domain::{Decimal, InstrumentKey, PortfolioId, Symbol, TimeMs};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe for readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Row decoding helpers. Stored values are written by this crate, so a parse
// failure means corruption and is surfaced as a decode error.

fn decode_err<E>(column: &str, err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

fn get_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| decode_err(column, e))
}

fn get_opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| decode_err(column, e)))
        .transpose()
}

fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| decode_err(column, e))
}

fn get_portfolio_id(row: &SqliteRow, column: &str) -> Result<PortfolioId, sqlx::Error> {
    get_uuid(row, column).map(PortfolioId)
}

fn get_time(row: &SqliteRow, column: &str) -> Result<TimeMs, sqlx::Error> {
    row.try_get::<i64, _>(column).map(TimeMs::new)
}

fn get_symbol(row: &SqliteRow, column: &str) -> Result<Symbol, sqlx::Error> {
    row.try_get::<String, _>(column).map(Symbol::from_canonical)
}

fn get_instrument_key(row: &SqliteRow, column: &str) -> Result<InstrumentKey, sqlx::Error> {
    row.try_get::<String, _>(column)
        .map(InstrumentKey::from_canonical)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::db::init_db;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Arc::new(Repository::new(pool)), temp_dir)
    }
}
