use crate::domain::{InstrumentKey, Symbol, TrackedInstrument};
use crate::engine::OversellPolicy;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MARKET_DATA_API_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub market_data_api_url: String,
    pub market_data_api_key: Option<String>,
    pub market_data_timeout: Duration,
    pub market_data_retry_budget: Duration,
    pub price_sync_interval: Duration,
    pub price_sync_enabled: bool,
    pub quote_cache_ttl: Duration,
    pub quote_cache_max_entries: usize,
    pub oversell_policy: OversellPolicy,
    /// Instruments seeded into the tracked universe at startup.
    pub tracked_instruments: Vec<TrackedInstrument>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let market_data_api_url = env_map
            .get("MARKET_DATA_API_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_MARKET_DATA_API_URL.to_string());

        let market_data_api_key = env_map
            .get("MARKET_DATA_API_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let timeout_ms = parse_or(&env_map, "MARKET_DATA_TIMEOUT_MS", 10_000u64, "must be a valid u64")?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MARKET_DATA_TIMEOUT_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let retry_budget_ms =
            parse_or(&env_map, "MARKET_DATA_RETRY_BUDGET_MS", 0u64, "must be a valid u64")?;

        let interval_ms = parse_or(&env_map, "PRICE_SYNC_INTERVAL_MS", 10_000u64, "must be a valid u64")?;
        if interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "PRICE_SYNC_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let price_sync_enabled = match env_map
            .get("PRICE_SYNC_ENABLED")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "PRICE_SYNC_ENABLED".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let cache_ttl_ms = parse_or(&env_map, "QUOTE_CACHE_TTL_MS", 60_000u64, "must be a valid u64")?;
        let quote_cache_max_entries = parse_or(
            &env_map,
            "QUOTE_CACHE_MAX_ENTRIES",
            1024usize,
            "must be a valid usize",
        )?;

        let oversell_policy = match env_map
            .get("OVERSELL_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("tolerate")
        {
            "tolerate" => OversellPolicy::Tolerate,
            "reject" => OversellPolicy::Reject,
            other => {
                return Err(ConfigError::InvalidValue(
                    "OVERSELL_POLICY".to_string(),
                    format!("must be tolerate or reject, got {}", other),
                ))
            }
        };

        let tracked_instruments = match env_map.get("TRACKED_INSTRUMENTS") {
            Some(raw) => parse_tracked_instruments(raw)?,
            None => Vec::new(),
        };

        Ok(Config {
            port,
            database_path,
            market_data_api_url,
            market_data_api_key,
            market_data_timeout: Duration::from_millis(timeout_ms),
            market_data_retry_budget: Duration::from_millis(retry_budget_ms),
            price_sync_interval: Duration::from_millis(interval_ms),
            price_sync_enabled,
            quote_cache_ttl: Duration::from_millis(cache_ttl_ms),
            quote_cache_max_entries,
            oversell_policy,
            tracked_instruments,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
    }
}

/// Parse `key:SYMBOL[:Name]` entries separated by commas.
fn parse_tracked_instruments(raw: &str) -> Result<Vec<TrackedInstrument>, ConfigError> {
    let invalid = |entry: &str, why: String| {
        ConfigError::InvalidValue(
            "TRACKED_INSTRUMENTS".to_string(),
            format!("bad entry {:?}: {}", entry, why),
        )
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let key = parts.next().unwrap_or_default();
            let symbol = parts
                .next()
                .ok_or_else(|| invalid(entry, "expected key:SYMBOL[:Name]".to_string()))?;
            let instrument_key =
                InstrumentKey::parse(key).map_err(|e| invalid(entry, e.to_string()))?;
            let symbol = Symbol::parse(symbol).map_err(|e| invalid(entry, e.to_string()))?;
            let name = parts
                .next()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| symbol.as_str().to_string());
            Ok(TrackedInstrument {
                instrument_key,
                symbol,
                name,
                active: true,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.market_data_api_url, DEFAULT_MARKET_DATA_API_URL);
        assert_eq!(config.market_data_api_key, None);
        assert_eq!(config.market_data_timeout, Duration::from_secs(10));
        assert_eq!(config.market_data_retry_budget, Duration::ZERO);
        assert_eq!(config.price_sync_interval, Duration::from_secs(10));
        assert!(config.price_sync_enabled);
        assert_eq!(config.quote_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.quote_cache_max_entries, 1024);
        assert_eq!(config.oversell_policy, OversellPolicy::Tolerate);
        assert!(config.tracked_instruments.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("PRICE_SYNC_INTERVAL_MS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PRICE_SYNC_INTERVAL_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_oversell_policy() {
        let mut env_map = setup_required_env();
        env_map.insert("OVERSELL_POLICY".to_string(), "ignore".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "OVERSELL_POLICY"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("OVERSELL_POLICY".to_string(), "reject".to_string());
        env_map.insert("PRICE_SYNC_ENABLED".to_string(), "false".to_string());
        env_map.insert("MARKET_DATA_API_KEY".to_string(), "  key ".to_string());
        env_map.insert("QUOTE_CACHE_TTL_MS".to_string(), "5000".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.oversell_policy, OversellPolicy::Reject);
        assert!(!config.price_sync_enabled);
        assert_eq!(config.market_data_api_key.as_deref(), Some("key"));
        assert_eq!(config.quote_cache_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_tracked_instruments() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "TRACKED_INSTRUMENTS".to_string(),
            "bitcoin:btc:Bitcoin, ethereum:ETH ,".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.tracked_instruments.len(), 2);
        assert_eq!(config.tracked_instruments[0].symbol.as_str(), "BTC");
        assert_eq!(config.tracked_instruments[0].name, "Bitcoin");
        assert_eq!(config.tracked_instruments[1].instrument_key.as_str(), "ethereum");
        assert_eq!(config.tracked_instruments[1].name, "ETH");
    }

    #[test]
    fn test_malformed_tracked_instrument() {
        let mut env_map = setup_required_env();
        env_map.insert("TRACKED_INSTRUMENTS".to_string(), "bitcoin".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "TRACKED_INSTRUMENTS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
