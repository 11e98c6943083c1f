//! Mock market data client for testing without network calls.

use super::{
    InstrumentDetail, MarketDataClient, MarketDataError, MarketPrice, PriceBatch, PriceHistory,
    PricePoint, SearchHit, TrendingInstrument,
};
use crate::domain::{Decimal, InstrumentKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    prices: HashMap<InstrumentKey, MarketPrice>,
    details: HashMap<InstrumentKey, InstrumentDetail>,
    search_hits: Vec<SearchHit>,
    trending: Vec<TrendingInstrument>,
    history: HashMap<InstrumentKey, Vec<PricePoint>>,
    failure: Option<MarketDataError>,
    fail_next: usize,
}

#[derive(Debug, Default)]
struct CallCounters {
    prices: AtomicUsize,
    detail: AtomicUsize,
    search: AtomicUsize,
    trending: AtomicUsize,
    history: AtomicUsize,
}

/// Mock client serving canned data, with failure injection and call accounting.
#[derive(Debug, Default)]
pub struct MockMarketDataClient {
    state: Mutex<MockState>,
    delay: Duration,
    calls: CallCounters,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockMarketDataClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a price with zero market cap, volume and change.
    pub fn with_price(self, key: &str, price: Decimal) -> Self {
        let Ok(instrument_key) = InstrumentKey::parse(key) else {
            return self;
        };
        self.with_market_price(MarketPrice {
            instrument_key,
            price,
            market_cap: Decimal::zero(),
            volume_24h: Decimal::zero(),
            change_24h: Decimal::zero(),
            change_pct_24h: Decimal::zero(),
        })
    }

    pub fn with_market_price(mut self, price: MarketPrice) -> Self {
        self.state
            .get_mut()
            .prices
            .insert(price.instrument_key.clone(), price);
        self
    }

    pub fn with_detail(mut self, detail: InstrumentDetail) -> Self {
        self.state
            .get_mut()
            .details
            .insert(detail.instrument_key.clone(), detail);
        self
    }

    pub fn with_search_hits(mut self, hits: Vec<SearchHit>) -> Self {
        self.state.get_mut().search_hits = hits;
        self
    }

    pub fn with_trending(mut self, trending: Vec<TrendingInstrument>) -> Self {
        self.state.get_mut().trending = trending;
        self
    }

    pub fn with_history(mut self, key: InstrumentKey, points: Vec<PricePoint>) -> Self {
        self.state.get_mut().history.insert(key, points);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn set_price(&self, key: InstrumentKey, price: Decimal) {
        let mut state = self.state.lock().await;
        let entry = state.prices.entry(key.clone()).or_insert_with(|| MarketPrice {
            instrument_key: key,
            price,
            market_cap: Decimal::zero(),
            volume_24h: Decimal::zero(),
            change_24h: Decimal::zero(),
            change_pct_24h: Decimal::zero(),
        });
        entry.price = price;
    }

    pub async fn remove_price(&self, key: &InstrumentKey) {
        self.state.lock().await.prices.remove(key);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub async fn set_failure(&self, error: Option<MarketDataError>) {
        self.state.lock().await.failure = error;
    }

    /// Fail the next `n` calls with a network error.
    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    pub fn price_calls(&self) -> usize {
        self.calls.prices.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.calls.detail.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.calls.search.load(Ordering::SeqCst)
    }

    pub fn trending_calls(&self) -> usize {
        self.calls.trending.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.calls.history.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Count the call, apply the delay and any injected failure.
    async fn enter(&self, counter: &AtomicUsize) -> Result<(), MarketDataError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().await;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MarketDataError::Network("injected failure".to_string()));
        }
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(id: &InstrumentKey) -> MarketDataError {
    MarketDataError::Http {
        status: 404,
        message: format!("unknown instrument {}", id),
    }
}

#[async_trait]
impl MarketDataClient for MockMarketDataClient {
    async fn fetch_prices(&self, ids: &[InstrumentKey]) -> Result<PriceBatch, MarketDataError> {
        self.enter(&self.calls.prices).await?;
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.prices.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn fetch_detail(&self, id: &InstrumentKey) -> Result<InstrumentDetail, MarketDataError> {
        self.enter(&self.calls.detail).await?;
        let state = self.state.lock().await;
        state.details.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, MarketDataError> {
        self.enter(&self.calls.search).await?;
        let term = term.to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .search_hits
            .iter()
            .filter(|hit| {
                hit.name.to_lowercase().contains(&term)
                    || hit.symbol.to_lowercase().contains(&term)
                    || hit.instrument_key.as_str().contains(&term)
            })
            .cloned()
            .collect())
    }

    async fn trending(&self) -> Result<Vec<TrendingInstrument>, MarketDataError> {
        self.enter(&self.calls.trending).await?;
        Ok(self.state.lock().await.trending.clone())
    }

    async fn fetch_history(
        &self,
        id: &InstrumentKey,
        days: u32,
    ) -> Result<PriceHistory, MarketDataError> {
        self.enter(&self.calls.history).await?;
        let state = self.state.lock().await;
        let prices = state.history.get(id).cloned().ok_or_else(|| not_found(id))?;
        Ok(PriceHistory {
            instrument_key: id.clone(),
            days,
            prices,
            market_caps: Vec::new(),
            volumes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn key(s: &str) -> InstrumentKey {
        InstrumentKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_mock_fetch_prices_omits_unknown() {
        let mock = MockMarketDataClient::new().with_price("bitcoin", d("67000"));
        let batch = mock
            .fetch_prices(&[key("bitcoin"), key("dogecoin")])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[&key("bitcoin")].price, d("67000"));
        assert_eq!(mock.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let mock = MockMarketDataClient::new().with_price("bitcoin", d("1"));

        mock.fail_next(1).await;
        assert!(mock.fetch_prices(&[key("bitcoin")]).await.is_err());
        assert!(mock.fetch_prices(&[key("bitcoin")]).await.is_ok());

        mock.set_failure(Some(MarketDataError::RateLimited)).await;
        assert_eq!(
            mock.trending().await.unwrap_err(),
            MarketDataError::RateLimited
        );
        mock.set_failure(None).await;
        assert!(mock.trending().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_set_price_updates_existing() {
        let mock = MockMarketDataClient::new().with_price("bitcoin", d("1"));
        mock.set_price(key("bitcoin"), d("2")).await;
        let batch = mock.fetch_prices(&[key("bitcoin")]).await.unwrap();
        assert_eq!(batch[&key("bitcoin")].price, d("2"));
    }

    #[tokio::test]
    async fn test_mock_detail_not_found() {
        let mock = MockMarketDataClient::new();
        let err = mock.fetch_detail(&key("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
