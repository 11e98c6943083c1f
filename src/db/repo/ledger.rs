//! Portfolio, transaction and position operations for the repository.

use crate::domain::{Portfolio, PortfolioId, Position, Symbol, Transaction, TradeKind};
use crate::engine::{LedgerInsert, LedgerTotals, ReconcileOutcome};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use super::{
    decode_err, get_decimal, get_opt_decimal, get_portfolio_id, get_symbol, get_time, get_uuid,
    Repository,
};

const TRANSACTION_COLUMNS: &str = r#"
    id, portfolio_id, kind, symbol, name, quantity, unit_price, fee,
    timestamp_ms, note, realized_pnl, created_at
"#;

const POSITION_COLUMNS: &str = r#"
    id, portfolio_id, symbol, name, quantity, average_cost,
    first_transaction_id, last_transaction_id, opened_at, updated_at
"#;

impl Repository {
    // =========================================================================
    // Portfolio operations
    // =========================================================================

    pub async fn insert_portfolio(&self, portfolio: &Portfolio) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, owner, name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(portfolio.id.to_string())
        .bind(&portfolio.owner)
        .bind(&portfolio.name)
        .bind(portfolio.created_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_portfolio(&self, id: PortfolioId) -> Result<Option<Portfolio>, sqlx::Error> {
        let row = sqlx::query("SELECT id, owner, name, created_at FROM portfolios WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(portfolio_from_row).transpose()
    }

    pub async fn find_portfolio(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Portfolio>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, owner, name, created_at FROM portfolios WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(portfolio_from_row).transpose()
    }

    pub async fn portfolios_for_owner(&self, owner: &str) -> Result<Vec<Portfolio>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, name, created_at FROM portfolios
            WHERE owner = ?
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(portfolio_from_row).collect()
    }

    /// Delete a portfolio; its transactions and positions cascade.
    ///
    /// Returns false if no such portfolio existed.
    pub async fn delete_portfolio(&self, id: PortfolioId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM portfolios WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Ledger reads
    // =========================================================================

    /// Transactions of a portfolio in replay order, optionally for one symbol.
    pub async fn query_transactions(
        &self,
        portfolio_id: PortfolioId,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_transactions(&mut conn, portfolio_id, symbol).await
    }

    pub async fn query_positions(
        &self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, sqlx::Error> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = ? ORDER BY symbol ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(portfolio_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    pub async fn get_position(
        &self,
        portfolio_id: PortfolioId,
        symbol: &Symbol,
    ) -> Result<Option<Position>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_position(&mut conn, portfolio_id, symbol).await
    }

    /// Sum of fees and realized P&L over a portfolio's whole ledger.
    pub async fn ledger_totals(
        &self,
        portfolio_id: PortfolioId,
    ) -> Result<LedgerTotals, sqlx::Error> {
        let rows = sqlx::query("SELECT fee, realized_pnl FROM transactions WHERE portfolio_id = ?")
            .bind(portfolio_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut totals = LedgerTotals::default();
        for row in &rows {
            let fee = get_decimal(row, "fee")?;
            let realized = get_opt_decimal(row, "realized_pnl")?.unwrap_or_default();
            // out-of-range sums keep the last representable total
            totals.total_fees = totals.total_fees.checked_add(fee).unwrap_or(totals.total_fees);
            totals.realized_pnl = totals
                .realized_pnl
                .checked_add(realized)
                .unwrap_or(totals.realized_pnl);
        }
        Ok(totals)
    }

    // =========================================================================
    // Ledger writes
    // =========================================================================

    /// Append a transaction and apply its position effect in one database transaction.
    ///
    /// `reconcile` receives the stored position for the transaction's
    /// (portfolio, symbol) and that pair's ledger, both read inside the
    /// transaction. A backdated insert restates later realized P&L and replaces
    /// the pair's position in the same transaction. If `reconcile` fails
    /// nothing is written. Callers must serialize calls per (portfolio, symbol).
    pub async fn apply_trade_atomic<F, E>(
        &self,
        transaction: &Transaction,
        reconcile: F,
    ) -> Result<LedgerInsert, E>
    where
        F: FnOnce(Option<&Position>, &[Transaction]) -> Result<LedgerInsert, E>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;

        let current =
            fetch_position(&mut tx, transaction.portfolio_id, &transaction.symbol).await?;
        let history =
            fetch_transactions(&mut tx, transaction.portfolio_id, Some(&transaction.symbol)).await?;
        let insert = reconcile(current.as_ref(), &history)?;

        let mut entry = transaction.clone();
        entry.realized_pnl = insert.realized_pnl;
        insert_transaction(&mut tx, &entry).await?;

        for (id, realized_pnl) in &insert.restated {
            sqlx::query("UPDATE transactions SET realized_pnl = ? WHERE id = ?")
                .bind(realized_pnl.map(|d| d.to_canonical_string()))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        if insert.backdated {
            sqlx::query("DELETE FROM positions WHERE portfolio_id = ? AND symbol = ?")
                .bind(transaction.portfolio_id.to_string())
                .bind(transaction.symbol.as_str())
                .execute(&mut *tx)
                .await?;
            if let Some(position) = insert.outcome.position() {
                insert_position(&mut tx, position).await?;
            }
        } else {
            match &insert.outcome {
                ReconcileOutcome::Created(position) => insert_position(&mut tx, position).await?,
                ReconcileOutcome::Updated(position) => update_position(&mut tx, position).await?,
                ReconcileOutcome::Removed(position) => {
                    sqlx::query("DELETE FROM positions WHERE id = ?")
                        .bind(position.id.to_string())
                        .execute(&mut *tx)
                        .await?;
                }
                ReconcileOutcome::Untouched => {}
            }
        }

        tx.commit().await?;
        Ok(insert)
    }

    /// Replace every stored position of a portfolio with `positions`.
    pub async fn replace_positions(
        &self,
        portfolio_id: PortfolioId,
        positions: &[Position],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM positions WHERE portfolio_id = ?")
            .bind(portfolio_id.to_string())
            .execute(&mut *tx)
            .await?;
        for position in positions {
            insert_position(&mut tx, position).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn fetch_position(
    conn: &mut SqliteConnection,
    portfolio_id: PortfolioId,
    symbol: &Symbol,
) -> Result<Option<Position>, sqlx::Error> {
    let sql = format!(
        "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = ? AND symbol = ?"
    );
    let row = sqlx::query(&sql)
        .bind(portfolio_id.to_string())
        .bind(symbol.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(position_from_row).transpose()
}

async fn fetch_transactions(
    conn: &mut SqliteConnection,
    portfolio_id: PortfolioId,
    symbol: Option<&Symbol>,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE portfolio_id = ? AND (? IS NULL OR symbol = ?)
        ORDER BY timestamp_ms ASC, created_at ASC, id ASC
        "#
    );
    let symbol = symbol.map(|s| s.as_str().to_string());
    let rows = sqlx::query(&sql)
        .bind(portfolio_id.to_string())
        .bind(symbol.clone())
        .bind(symbol)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(transaction_from_row).collect()
}

async fn insert_transaction(
    conn: &mut SqliteConnection,
    t: &Transaction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, portfolio_id, kind, symbol, name, quantity, unit_price, fee,
            timestamp_ms, note, realized_pnl, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(t.id.to_string())
    .bind(t.portfolio_id.to_string())
    .bind(t.kind.as_str())
    .bind(t.symbol.as_str())
    .bind(t.name.as_deref())
    .bind(t.quantity.to_canonical_string())
    .bind(t.unit_price.to_canonical_string())
    .bind(t.fee.to_canonical_string())
    .bind(t.timestamp.as_ms())
    .bind(t.note.as_deref())
    .bind(t.realized_pnl.map(|d| d.to_canonical_string()))
    .bind(t.created_at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_position(conn: &mut SqliteConnection, p: &Position) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO positions (
            id, portfolio_id, symbol, name, quantity, average_cost,
            first_transaction_id, last_transaction_id, opened_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.id.to_string())
    .bind(p.portfolio_id.to_string())
    .bind(p.symbol.as_str())
    .bind(&p.name)
    .bind(p.quantity.to_canonical_string())
    .bind(p.average_cost.to_canonical_string())
    .bind(p.first_transaction_id.to_string())
    .bind(p.last_transaction_id.to_string())
    .bind(p.opened_at.as_ms())
    .bind(p.updated_at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_position(conn: &mut SqliteConnection, p: &Position) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE positions
        SET name = ?, quantity = ?, average_cost = ?, last_transaction_id = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&p.name)
    .bind(p.quantity.to_canonical_string())
    .bind(p.average_cost.to_canonical_string())
    .bind(p.last_transaction_id.to_string())
    .bind(p.updated_at.as_ms())
    .bind(p.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

fn portfolio_from_row(row: &SqliteRow) -> Result<Portfolio, sqlx::Error> {
    Ok(Portfolio {
        id: get_portfolio_id(row, "id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        created_at: get_time(row, "created_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(Transaction {
        id: get_uuid(row, "id")?,
        portfolio_id: get_portfolio_id(row, "portfolio_id")?,
        kind: TradeKind::from_str(&kind).map_err(|e| decode_err("kind", e))?,
        symbol: get_symbol(row, "symbol")?,
        name: row.try_get("name")?,
        quantity: get_decimal(row, "quantity")?,
        unit_price: get_decimal(row, "unit_price")?,
        fee: get_decimal(row, "fee")?,
        timestamp: get_time(row, "timestamp_ms")?,
        note: row.try_get("note")?,
        realized_pnl: get_opt_decimal(row, "realized_pnl")?,
        created_at: get_time(row, "created_at")?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position, sqlx::Error> {
    Ok(Position {
        id: get_uuid(row, "id")?,
        portfolio_id: get_portfolio_id(row, "portfolio_id")?,
        symbol: get_symbol(row, "symbol")?,
        name: row.try_get("name")?,
        quantity: get_decimal(row, "quantity")?,
        average_cost: get_decimal(row, "average_cost")?,
        first_transaction_id: get_uuid(row, "first_transaction_id")?,
        last_transaction_id: get_uuid(row, "last_transaction_id")?,
        opened_at: get_time(row, "opened_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}
