//! Price store and tracked-instrument operations.

use crate::domain::{InstrumentKey, PriceQuote, Symbol, TrackedInstrument};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{get_decimal, get_instrument_key, get_symbol, get_time, Repository};

const QUOTE_COLUMNS: &str = r#"
    instrument_key, symbol, name, current_price, market_cap, volume_24h,
    change_24h, change_pct_24h, last_updated
"#;

impl Repository {
    // =========================================================================
    // Price store
    // =========================================================================

    /// Insert or replace the row for the quote's instrument in a single statement.
    pub async fn upsert_price_quote(&self, quote: &PriceQuote) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO price_quotes (
                instrument_key, symbol, name, current_price, market_cap, volume_24h,
                change_24h, change_pct_24h, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(instrument_key) DO UPDATE SET
                symbol = excluded.symbol,
                name = excluded.name,
                current_price = excluded.current_price,
                market_cap = excluded.market_cap,
                volume_24h = excluded.volume_24h,
                change_24h = excluded.change_24h,
                change_pct_24h = excluded.change_pct_24h,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(quote.instrument_key.as_str())
        .bind(quote.symbol.as_str())
        .bind(&quote.name)
        .bind(quote.current_price.to_canonical_string())
        .bind(quote.market_cap.to_canonical_string())
        .bind(quote.volume_24h.to_canonical_string())
        .bind(quote.change_24h.to_canonical_string())
        .bind(quote.change_pct_24h.to_canonical_string())
        .bind(quote.last_updated.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_price_quote(
        &self,
        key: &InstrumentKey,
    ) -> Result<Option<PriceQuote>, sqlx::Error> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM price_quotes WHERE instrument_key = ?");
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(quote_from_row).transpose()
    }

    /// Every stored quote, ordered by instrument key.
    pub async fn price_quotes(&self) -> Result<Vec<PriceQuote>, sqlx::Error> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM price_quotes ORDER BY instrument_key");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(quote_from_row).collect()
    }

    pub async fn price_quotes_for_keys(
        &self,
        keys: &[InstrumentKey],
    ) -> Result<Vec<PriceQuote>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM price_quotes WHERE instrument_key IN ({placeholders}) ORDER BY instrument_key"
        );
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(key.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(quote_from_row).collect()
    }

    /// Latest quotes for the given symbols, one per symbol.
    ///
    /// When several instruments share a symbol the most recently updated wins.
    pub async fn price_quotes_for_symbols(
        &self,
        symbols: &[Symbol],
    ) -> Result<Vec<PriceQuote>, sqlx::Error> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; symbols.len()].join(", ");
        let sql = format!(
            r#"
            SELECT {QUOTE_COLUMNS} FROM price_quotes
            WHERE symbol IN ({placeholders})
            ORDER BY symbol, last_updated DESC, instrument_key
            "#
        );
        let mut query = sqlx::query(&sql);
        for symbol in symbols {
            query = query.bind(symbol.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut quotes: Vec<PriceQuote> = Vec::with_capacity(symbols.len());
        for row in &rows {
            let quote = quote_from_row(row)?;
            if quotes.last().map(|q| &q.symbol) != Some(&quote.symbol) {
                quotes.push(quote);
            }
        }
        Ok(quotes)
    }

    // =========================================================================
    // Tracked instruments
    // =========================================================================

    pub async fn upsert_tracked_instrument(
        &self,
        instrument: &TrackedInstrument,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tracked_instruments (instrument_key, symbol, name, active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(instrument_key) DO UPDATE SET
                symbol = excluded.symbol,
                name = excluded.name,
                active = excluded.active
            "#,
        )
        .bind(instrument.instrument_key.as_str())
        .bind(instrument.symbol.as_str())
        .bind(&instrument.name)
        .bind(instrument.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The synchronization universe: active instruments ordered by key.
    pub async fn active_instruments(&self) -> Result<Vec<TrackedInstrument>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT instrument_key, symbol, name, active FROM tracked_instruments
            WHERE active = 1
            ORDER BY instrument_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instrument_from_row).collect()
    }

    /// Resolve a symbol to a tracked instrument, preferring active ones.
    pub async fn tracked_instrument_by_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<TrackedInstrument>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT instrument_key, symbol, name, active FROM tracked_instruments
            WHERE symbol = ?
            ORDER BY active DESC, instrument_key
            LIMIT 1
            "#,
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(instrument_from_row).transpose()
    }

    /// Returns false if the instrument is not tracked.
    pub async fn set_instrument_active(
        &self,
        key: &InstrumentKey,
        active: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE tracked_instruments SET active = ? WHERE instrument_key = ?")
            .bind(active)
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn quote_from_row(row: &SqliteRow) -> Result<PriceQuote, sqlx::Error> {
    Ok(PriceQuote {
        instrument_key: get_instrument_key(row, "instrument_key")?,
        symbol: get_symbol(row, "symbol")?,
        name: row.try_get("name")?,
        current_price: get_decimal(row, "current_price")?,
        market_cap: get_decimal(row, "market_cap")?,
        volume_24h: get_decimal(row, "volume_24h")?,
        change_24h: get_decimal(row, "change_24h")?,
        change_pct_24h: get_decimal(row, "change_pct_24h")?,
        last_updated: get_time(row, "last_updated")?,
    })
}

fn instrument_from_row(row: &SqliteRow) -> Result<TrackedInstrument, sqlx::Error> {
    Ok(TrackedInstrument {
        instrument_key: get_instrument_key(row, "instrument_key")?,
        symbol: get_symbol(row, "symbol")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_repo;
    use crate::domain::{Decimal, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn quote(key: &str, symbol: &str, price: &str, updated: i64) -> PriceQuote {
        PriceQuote {
            instrument_key: InstrumentKey::parse(key).unwrap(),
            symbol: Symbol::parse(symbol).unwrap(),
            name: key.to_string(),
            current_price: d(price),
            market_cap: d("1000000"),
            volume_24h: d("5000"),
            change_24h: d("10"),
            change_pct_24h: d("1.5"),
            last_updated: TimeMs::new(updated),
        }
    }

    fn instrument(key: &str, symbol: &str, active: bool) -> TrackedInstrument {
        TrackedInstrument {
            instrument_key: InstrumentKey::parse(key).unwrap(),
            symbol: Symbol::parse(symbol).unwrap(),
            name: key.to_string(),
            active,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let (repo, _temp) = setup_repo().await;
        repo.upsert_price_quote(&quote("bitcoin", "BTC", "65000", 1))
            .await
            .unwrap();
        repo.upsert_price_quote(&quote("bitcoin", "BTC", "67000", 2))
            .await
            .unwrap();

        let all = repo.price_quotes().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].current_price, d("67000"));
        assert_eq!(all[0].last_updated, TimeMs::new(2));
    }

    #[tokio::test]
    async fn test_quotes_for_keys() {
        let (repo, _temp) = setup_repo().await;
        for q in [
            quote("bitcoin", "BTC", "67000", 1),
            quote("ethereum", "ETH", "3500", 1),
            quote("solana", "SOL", "150", 1),
        ] {
            repo.upsert_price_quote(&q).await.unwrap();
        }

        let keys = vec![
            InstrumentKey::parse("solana").unwrap(),
            InstrumentKey::parse("bitcoin").unwrap(),
            InstrumentKey::parse("dogecoin").unwrap(),
        ];
        let found = repo.price_quotes_for_keys(&keys).await.unwrap();
        let found_keys: Vec<&str> = found.iter().map(|q| q.instrument_key.as_str()).collect();
        assert_eq!(found_keys, vec!["bitcoin", "solana"]);
        assert!(repo.price_quotes_for_keys(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quotes_for_symbols_prefers_most_recent() {
        let (repo, _temp) = setup_repo().await;
        repo.upsert_price_quote(&quote("usd-coin", "USDC", "1", 5))
            .await
            .unwrap();
        repo.upsert_price_quote(&quote("bridged-usdc", "USDC", "0.99", 3))
            .await
            .unwrap();

        let found = repo
            .price_quotes_for_symbols(&[Symbol::parse("usdc").unwrap()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instrument_key.as_str(), "usd-coin");
    }

    #[tokio::test]
    async fn test_tracked_instruments() {
        let (repo, _temp) = setup_repo().await;
        repo.upsert_tracked_instrument(&instrument("bitcoin", "BTC", true))
            .await
            .unwrap();
        repo.upsert_tracked_instrument(&instrument("ethereum", "ETH", true))
            .await
            .unwrap();

        assert_eq!(repo.active_instruments().await.unwrap().len(), 2);

        let eth = InstrumentKey::parse("ethereum").unwrap();
        assert!(repo.set_instrument_active(&eth, false).await.unwrap());
        let active = repo.active_instruments().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].instrument_key.as_str(), "bitcoin");

        let missing = InstrumentKey::parse("nope").unwrap();
        assert!(!repo.set_instrument_active(&missing, true).await.unwrap());

        let btc = repo
            .tracked_instrument_by_symbol(&Symbol::parse("btc").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(btc.instrument_key.as_str(), "bitcoin");
    }
}
