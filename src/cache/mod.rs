//! In-memory caching for interactive market data lookups.

pub mod quote_cache;

pub use quote_cache::{CacheStats, QueryKey, QuoteCache};
