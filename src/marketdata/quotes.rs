//! Interactive quote lookups backed by the price store and the quote cache.

use super::{
    InstrumentDetail, MarketDataClient, MarketDataError, MarketPrice, PriceBatch, PriceHistory,
    SearchHit, TrendingInstrument,
};
use crate::cache::{QueryKey, QuoteCache};
use crate::db::Repository;
use crate::domain::{InstrumentKey, PriceQuote, Symbol, TimeMs};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("market data unavailable: {0}")]
    Upstream(#[from] MarketDataError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("symbol {0} is not tracked")]
    UnknownSymbol(Symbol),
}

/// Market data for a tracked symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolQuote {
    pub instrument_key: InstrumentKey,
    pub symbol: Symbol,
    pub name: String,
    /// None if the instrument has never been priced.
    pub market: Option<MarketPrice>,
    pub last_updated: Option<TimeMs>,
    /// True when served from an old price store row because upstream failed.
    pub stale: bool,
}

/// Read-through market data for request handlers.
///
/// Price lookups use price store rows younger than the cache TTL before going
/// upstream; everything else goes through a per-kind [`QuoteCache`].
#[derive(Debug)]
pub struct QuoteService {
    client: Arc<dyn MarketDataClient>,
    repo: Arc<Repository>,
    ttl: Duration,
    prices: QuoteCache<PriceBatch>,
    details: QuoteCache<InstrumentDetail>,
    searches: QuoteCache<Vec<SearchHit>>,
    trending: QuoteCache<Vec<TrendingInstrument>>,
    histories: QuoteCache<PriceHistory>,
}

impl QuoteService {
    pub fn new(
        client: Arc<dyn MarketDataClient>,
        repo: Arc<Repository>,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            client,
            repo,
            ttl,
            prices: QuoteCache::new(ttl, max_entries),
            details: QuoteCache::new(ttl, max_entries),
            searches: QuoteCache::new(ttl, max_entries),
            trending: QuoteCache::new(ttl, max_entries),
            histories: QuoteCache::new(ttl, max_entries),
        }
    }

    fn max_age_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Current prices for `ids`. Unknown instruments are absent from the result.
    pub async fn prices(&self, ids: &[InstrumentKey]) -> Result<PriceBatch, QuoteError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(PriceBatch::new());
        }

        let now = TimeMs::now();
        let stored = self.repo.price_quotes_for_keys(&ids).await?;
        let fresh: PriceBatch = stored
            .iter()
            .filter(|q| q.is_fresh(now, self.max_age_ms()))
            .map(|q| (q.instrument_key.clone(), market_price_from_quote(q)))
            .collect();
        if fresh.len() == ids.len() {
            debug!(count = ids.len(), "serving prices from price store");
            return Ok(fresh);
        }

        let key = QueryKey::prices(ids.iter().map(InstrumentKey::as_str));
        let client = Arc::clone(&self.client);
        let batch = self
            .prices
            .get_or_fetch(key, || async move { client.fetch_prices(&ids).await })
            .await?;
        Ok(batch)
    }

    /// Quote for a tracked symbol, falling back to the last stored price when
    /// upstream fails.
    pub async fn quote_for_symbol(&self, symbol: &Symbol) -> Result<SymbolQuote, QuoteError> {
        let instrument = self
            .repo
            .tracked_instrument_by_symbol(symbol)
            .await?
            .ok_or_else(|| QuoteError::UnknownSymbol(symbol.clone()))?;
        let key = instrument.instrument_key.clone();
        let stored = self.repo.get_price_quote(&key).await?;

        let mut quote = SymbolQuote {
            instrument_key: key.clone(),
            symbol: instrument.symbol.clone(),
            name: instrument.name.clone(),
            market: None,
            last_updated: None,
            stale: false,
        };

        if let Some(row) = stored.as_ref().filter(|q| q.is_fresh(TimeMs::now(), self.max_age_ms())) {
            quote.market = Some(market_price_from_quote(row));
            quote.last_updated = Some(row.last_updated);
            return Ok(quote);
        }

        match self.prices(std::slice::from_ref(&key)).await {
            Ok(mut batch) => {
                if let Some(price) = batch.remove(&key) {
                    quote.market = Some(price);
                    quote.last_updated = Some(TimeMs::now());
                } else if let Some(row) = stored {
                    quote.market = Some(market_price_from_quote(&row));
                    quote.last_updated = Some(row.last_updated);
                    quote.stale = true;
                }
                Ok(quote)
            }
            Err(QuoteError::Upstream(e)) => match stored {
                Some(row) => {
                    warn!(symbol = %symbol, error = %e, "upstream failed, serving stored price");
                    quote.market = Some(market_price_from_quote(&row));
                    quote.last_updated = Some(row.last_updated);
                    quote.stale = true;
                    Ok(quote)
                }
                None => Err(QuoteError::Upstream(e)),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn detail(&self, id: &InstrumentKey) -> Result<InstrumentDetail, QuoteError> {
        let client = Arc::clone(&self.client);
        let id = id.clone();
        let detail = self
            .details
            .get_or_fetch(QueryKey::detail(id.as_str()), || async move {
                client.fetch_detail(&id).await
            })
            .await?;
        Ok(detail)
    }

    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>, QuoteError> {
        let key = QueryKey::search(term);
        let QueryKey::Search(normalized) = &key else {
            return Ok(Vec::new());
        };
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let normalized = normalized.clone();
        let client = Arc::clone(&self.client);
        let hits = self
            .searches
            .get_or_fetch(key, || async move { client.search(&normalized).await })
            .await?;
        Ok(hits)
    }

    pub async fn trending(&self) -> Result<Vec<TrendingInstrument>, QuoteError> {
        let client = Arc::clone(&self.client);
        let trending = self
            .trending
            .get_or_fetch(QueryKey::Trending, || async move { client.trending().await })
            .await?;
        Ok(trending)
    }

    pub async fn history(
        &self,
        id: &InstrumentKey,
        days: u32,
    ) -> Result<PriceHistory, QuoteError> {
        let client = Arc::clone(&self.client);
        let id = id.clone();
        let history = self
            .histories
            .get_or_fetch(QueryKey::history(id.as_str(), days), || async move {
                client.fetch_history(&id, days).await
            })
            .await?;
        Ok(history)
    }
}

fn market_price_from_quote(quote: &PriceQuote) -> MarketPrice {
    MarketPrice {
        instrument_key: quote.instrument_key.clone(),
        price: quote.current_price,
        market_cap: quote.market_cap,
        volume_24h: quote.volume_24h,
        change_24h: quote.change_24h,
        change_pct_24h: quote.change_pct_24h,
    }
}
