//! CoinGecko public API client.

use super::{
    InstrumentDetail, MarketDataClient, MarketDataError, MarketPrice, PriceBatch, PriceHistory,
    PricePoint, SearchHit, TrendingInstrument,
};
use crate::domain::{Decimal, InstrumentKey, TimeMs};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";
const VS_CURRENCY: &str = "usd";

/// CoinGecko market data client.
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry_budget: Duration,
}

impl CoinGeckoClient {
    /// Create a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            retry_budget: Duration::ZERO,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Total time transient failures (429, 5xx, network) may be retried for.
    /// Zero means a single attempt.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_budget),
            ..Default::default()
        };

        debug!(url = %url, "market data request");

        retry(backoff, || async {
            let mut request = self.client.get(&url).query(query);
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::transient(MarketDataError::Timeout)
                } else {
                    backoff::Error::transient(MarketDataError::Network(e.to_string()))
                }
            })?;

            let status = response.status();
            if status.as_u16() == 429 {
                return Err(backoff::Error::transient(MarketDataError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(MarketDataError::Http {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("Server error").to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(MarketDataError::Http {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("Client error").to_string(),
                }));
            }

            response.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::permanent(MarketDataError::Timeout)
                } else {
                    backoff::Error::permanent(MarketDataError::Parse(e.to_string()))
                }
            })
        })
        .await
    }
}

#[async_trait]
impl MarketDataClient for CoinGeckoClient {
    async fn fetch_prices(&self, ids: &[InstrumentKey]) -> Result<PriceBatch, MarketDataError> {
        if ids.is_empty() {
            return Ok(PriceBatch::new());
        }
        let joined = ids
            .iter()
            .map(InstrumentKey::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let query = [
            ("ids", joined),
            ("vs_currencies", VS_CURRENCY.to_string()),
            ("include_market_cap", "true".to_string()),
            ("include_24hr_vol", "true".to_string()),
            ("include_24hr_change", "true".to_string()),
        ];
        let response = self.get_json("/simple/price", &query).await?;
        parse_price_batch(&response)
    }

    async fn fetch_detail(&self, id: &InstrumentKey) -> Result<InstrumentDetail, MarketDataError> {
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
        ];
        let response = self
            .get_json(&format!("/coins/{}", id.as_str()), &query)
            .await?;
        parse_detail(&response)
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, MarketDataError> {
        let response = self
            .get_json("/search", &[("query", term.to_string())])
            .await?;
        parse_search(&response)
    }

    async fn trending(&self) -> Result<Vec<TrendingInstrument>, MarketDataError> {
        let response = self.get_json("/search/trending", &[]).await?;
        parse_trending(&response)
    }

    async fn fetch_history(
        &self,
        id: &InstrumentKey,
        days: u32,
    ) -> Result<PriceHistory, MarketDataError> {
        let query = [
            ("vs_currency", VS_CURRENCY.to_string()),
            ("days", days.to_string()),
        ];
        let response = self
            .get_json(&format!("/coins/{}/market_chart", id.as_str()), &query)
            .await?;
        parse_history(&response, id, days)
    }
}

/// Read a JSON number (or numeric string) losslessly where possible.
fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn usd_field(value: &Value, field: &str) -> Option<Decimal> {
    value.get(field).and_then(|v| v.get(VS_CURRENCY)).and_then(json_decimal)
}

fn required_str(value: &Value, field: &str) -> Result<String, MarketDataError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MarketDataError::Parse(format!("Missing {} field", field)))
}

fn required_key(value: &Value, field: &str) -> Result<InstrumentKey, MarketDataError> {
    InstrumentKey::parse(&required_str(value, field)?)
        .map_err(|e| MarketDataError::Parse(format!("Invalid {}: {}", field, e)))
}

fn rank(value: &Value) -> Option<u32> {
    value
        .get("market_cap_rank")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok())
}

/// Absolute 24h change implied by the current price and the percentage change.
fn absolute_change(price: Decimal, change_pct: Decimal) -> Decimal {
    (price * change_pct).ratio_or_zero(Decimal::hundred() + change_pct)
}

fn parse_price_batch(response: &Value) -> Result<PriceBatch, MarketDataError> {
    let entries = response
        .as_object()
        .ok_or_else(|| MarketDataError::Parse("Expected object response".to_string()))?;

    let mut batch = PriceBatch::with_capacity(entries.len());
    for (id, entry) in entries {
        match parse_price_entry(id, entry) {
            Ok(price) => {
                batch.insert(price.instrument_key.clone(), price);
            }
            Err(e) => {
                warn!(instrument = %id, error = %e, "skipping malformed price entry");
            }
        }
    }
    Ok(batch)
}

fn parse_price_entry(id: &str, entry: &Value) -> Result<MarketPrice, MarketDataError> {
    let instrument_key = InstrumentKey::parse(id)
        .map_err(|e| MarketDataError::Parse(format!("Invalid instrument id: {}", e)))?;
    let price = entry
        .get(VS_CURRENCY)
        .and_then(json_decimal)
        .ok_or_else(|| MarketDataError::Parse("Missing usd price".to_string()))?;
    let change_pct_24h = entry
        .get("usd_24h_change")
        .and_then(json_decimal)
        .unwrap_or_default();

    Ok(MarketPrice {
        instrument_key,
        price,
        market_cap: entry
            .get("usd_market_cap")
            .and_then(json_decimal)
            .unwrap_or_default(),
        volume_24h: entry
            .get("usd_24h_vol")
            .and_then(json_decimal)
            .unwrap_or_default(),
        change_24h: absolute_change(price, change_pct_24h),
        change_pct_24h,
    })
}

fn parse_detail(response: &Value) -> Result<InstrumentDetail, MarketDataError> {
    let market = response
        .get("market_data")
        .ok_or_else(|| MarketDataError::Parse("Missing market_data field".to_string()))?;

    Ok(InstrumentDetail {
        instrument_key: required_key(response, "id")?,
        symbol: required_str(response, "symbol")?.to_uppercase(),
        name: required_str(response, "name")?,
        description: response
            .get("description")
            .and_then(|d| d.get("en"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        image: response
            .get("image")
            .and_then(|i| i.get("large"))
            .and_then(Value::as_str)
            .map(str::to_string),
        market_cap_rank: rank(response),
        current_price: usd_field(market, "current_price").unwrap_or_default(),
        market_cap: usd_field(market, "market_cap").unwrap_or_default(),
        volume_24h: usd_field(market, "total_volume").unwrap_or_default(),
        high_24h: usd_field(market, "high_24h"),
        low_24h: usd_field(market, "low_24h"),
        change_pct_24h: market
            .get("price_change_percentage_24h")
            .and_then(json_decimal)
            .unwrap_or_default(),
        circulating_supply: market.get("circulating_supply").and_then(json_decimal),
        total_supply: market.get("total_supply").and_then(json_decimal),
        all_time_high: usd_field(market, "ath"),
    })
}

fn parse_search(response: &Value) -> Result<Vec<SearchHit>, MarketDataError> {
    let coins = response
        .get("coins")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketDataError::Parse("Missing coins array".to_string()))?;

    let mut hits = Vec::with_capacity(coins.len());
    for coin in coins {
        let hit = required_key(coin, "id").and_then(|instrument_key| {
            Ok(SearchHit {
                instrument_key,
                symbol: required_str(coin, "symbol")?.to_uppercase(),
                name: required_str(coin, "name")?,
                market_cap_rank: rank(coin),
                thumb: coin.get("thumb").and_then(Value::as_str).map(str::to_string),
            })
        });
        match hit {
            Ok(hit) => hits.push(hit),
            Err(e) => warn!(error = %e, "skipping malformed search hit"),
        }
    }
    Ok(hits)
}

fn parse_trending(response: &Value) -> Result<Vec<TrendingInstrument>, MarketDataError> {
    let coins = response
        .get("coins")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketDataError::Parse("Missing coins array".to_string()))?;

    let mut trending = Vec::with_capacity(coins.len());
    for (position, coin) in coins.iter().enumerate() {
        let Some(item) = coin.get("item") else {
            warn!("skipping trending entry without item");
            continue;
        };
        let entry = required_key(item, "id").and_then(|instrument_key| {
            Ok(TrendingInstrument {
                instrument_key,
                symbol: required_str(item, "symbol")?.to_uppercase(),
                name: required_str(item, "name")?,
                market_cap_rank: rank(item),
                price_btc: item.get("price_btc").and_then(json_decimal),
                score: item
                    .get("score")
                    .and_then(Value::as_u64)
                    .and_then(|s| u32::try_from(s).ok())
                    .unwrap_or(position as u32),
            })
        });
        match entry {
            Ok(entry) => trending.push(entry),
            Err(e) => warn!(error = %e, "skipping malformed trending entry"),
        }
    }
    Ok(trending)
}

fn parse_series(response: &Value, field: &str) -> Result<Vec<PricePoint>, MarketDataError> {
    let Some(raw) = response.get(field) else {
        return Ok(Vec::new());
    };
    let points = raw
        .as_array()
        .ok_or_else(|| MarketDataError::Parse(format!("Expected {} array", field)))?;

    Ok(points
        .iter()
        .filter_map(|point| {
            let pair = point.as_array()?;
            let ms = pair
                .first()
                .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))?;
            let value = pair.get(1).and_then(json_decimal)?;
            Some(PricePoint {
                timestamp: TimeMs::new(ms),
                value,
            })
        })
        .collect())
}

fn parse_history(
    response: &Value,
    id: &InstrumentKey,
    days: u32,
) -> Result<PriceHistory, MarketDataError> {
    if response.get("prices").is_none() {
        return Err(MarketDataError::Parse("Missing prices field".to_string()));
    }
    Ok(PriceHistory {
        instrument_key: id.clone(),
        days,
        prices: parse_series(response, "prices")?,
        market_caps: parse_series(response, "market_caps")?,
        volumes: parse_series(response, "total_volumes")?,
    })
}
