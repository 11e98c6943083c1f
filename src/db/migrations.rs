//! Database migrations and initialization.
//!
//! The schema is idempotent (`CREATE ... IF NOT EXISTS`) and applied on every start.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Open (creating if needed) the SQLite database at `db_path` and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { apply_pragmas(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    let applied = run_migrations(&pool).await?;
    info!(path = %db_path, statements = applied, "database ready");
    Ok(pool)
}

/// Apply every schema statement inside one transaction. Returns the statement count.
async fn run_migrations(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut applied = 0;
    for statement in SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(&mut *tx).await?;
        applied += 1;
    }
    tx.commit().await?;
    Ok(applied)
}

/// Per-connection pragmas: cascading foreign keys, WAL, and a busy timeout so
/// concurrent writers wait instead of failing with SQLITE_BUSY.
async fn apply_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode reports the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    debug!(journal_mode = %journal_mode, "sqlite connection configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("nested")
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir)
    }

    #[tokio::test]
    async fn test_init_db_creates_all_tables() {
        let (pool, _temp) = temp_pool().await;

        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sqlite_master
            WHERE type = 'table'
              AND name IN ('portfolios', 'transactions', 'positions', 'price_quotes', 'tracked_instruments')
            "#,
        )
        .fetch_one(&pool)
        .await
        .expect("query failed");
        assert_eq!(result.0, 5);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (pool, _temp) = temp_pool().await;
        let applied = run_migrations(&pool)
            .await
            .expect("second migration run failed");
        assert!(applied > 0);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let (pool, _temp) = temp_pool().await;
        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_position_uniqueness_enforced() {
        let (pool, _temp) = temp_pool().await;

        sqlx::query(
            "INSERT INTO portfolios (id, owner, name, created_at) VALUES ('p1', 'o', 'n', 0)",
        )
        .execute(&pool)
        .await
        .expect("insert portfolio failed");

        let insert = r#"
            INSERT INTO positions (id, portfolio_id, symbol, name, quantity, average_cost,
                first_transaction_id, last_transaction_id, opened_at, updated_at)
            VALUES (?, 'p1', 'BTC', 'Bitcoin', '1', '1', 't', 't', 0, 0)
        "#;
        sqlx::query(insert)
            .bind("a")
            .execute(&pool)
            .await
            .expect("first insert failed");
        let duplicate = sqlx::query(insert).bind("b").execute(&pool).await;
        assert!(duplicate.is_err(), "second position for one symbol must fail");
    }

    #[tokio::test]
    async fn test_deleting_portfolio_cascades() {
        let (pool, _temp) = temp_pool().await;

        sqlx::query(
            "INSERT INTO portfolios (id, owner, name, created_at) VALUES ('p1', 'o', 'n', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO transactions (id, portfolio_id, kind, symbol, quantity, unit_price,
                timestamp_ms, created_at)
            VALUES ('t1', 'p1', 'BUY', 'BTC', '1', '1', 0, 0)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM portfolios WHERE id = 'p1'")
            .execute(&pool)
            .await
            .unwrap();

        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(result.0, 0);
    }
}
