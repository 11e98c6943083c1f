//! TTL cache keyed by normalized upstream queries.
//!
//! Entries expire lazily: an expired entry is ignored on read and replaced on
//! the next successful fetch. The lock is never held while a fetch runs, so
//! concurrent misses on one key may each call the fetcher; the last result wins.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Normalized identity of an upstream query.
///
/// Two requests that differ only in id order, duplicates, case or surrounding
/// whitespace map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Prices(Vec<String>),
    Detail(String),
    Search(String),
    Trending,
    History { id: String, days: u32 },
}

impl QueryKey {
    pub fn prices<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        QueryKey::Prices(ids)
    }

    pub fn detail(id: &str) -> Self {
        QueryKey::Detail(id.trim().to_lowercase())
    }

    pub fn search(term: &str) -> Self {
        QueryKey::Search(term.trim().to_lowercase())
    }

    pub fn history(id: &str, days: u32) -> Self {
        QueryKey::History {
            id: id.trim().to_lowercase(),
            days,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Prices(ids) => write!(f, "prices:{}", ids.join(",")),
            QueryKey::Detail(id) => write!(f, "detail:{}", id),
            QueryKey::Search(term) => write!(f, "search:{}", term),
            QueryKey::Trending => write!(f, "trending"),
            QueryKey::History { id, days } => write!(f, "history:{}:{}", id, days),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<QueryKey, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Bounded TTL cache of upstream responses.
#[derive(Debug)]
pub struct QuoteCache<V> {
    inner: RwLock<Inner<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> QuoteCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key` if present and not expired.
    pub async fn get(&self, key: &QueryKey) -> Option<V> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, evicting if the cache is full.
    pub async fn insert(&self, key: QueryKey, value: V) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let ttl = self.ttl;
            inner
                .entries
                .retain(|_, entry| now.duration_since(entry.stored_at) < ttl);

            if inner.entries.len() >= self.max_entries {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    trace!(key = %oldest, "evicting oldest cache entry");
                    inner.entries.remove(&oldest);
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Return the cached value, or run `fetch`, store its result and return it.
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: QueryKey, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            self.inner.write().await.hits += 1;
            trace!(key = %key, "quote cache hit");
            return Ok(value);
        }

        self.inner.write().await.misses += 1;
        trace!(key = %key, "quote cache miss");

        let value = fetch().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn invalidate(&self, key: &QueryKey) {
        self.inner.write().await.entries.remove(key);
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl<V: Clone> Default for QuoteCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_query_key_normalization() {
        let a = QueryKey::prices(["Ethereum", "bitcoin", " BITCOIN "]);
        let b = QueryKey::prices(["bitcoin", "ethereum"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "prices:bitcoin,ethereum");

        assert_eq!(QueryKey::search("  Sol "), QueryKey::Search("sol".to_string()));
        assert_eq!(QueryKey::detail("Bitcoin").to_string(), "detail:bitcoin");
        assert_eq!(QueryKey::history("bitcoin", 7).to_string(), "history:bitcoin:7");
        assert_ne!(QueryKey::history("bitcoin", 7), QueryKey::history("bitcoin", 30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_skips_fetcher() {
        let cache: QuoteCache<u32> = QuoteCache::new(Duration::from_secs(60), 16);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(7)
        };

        assert_eq!(cache.get_or_fetch(QueryKey::Trending, fetch).await, Ok(7));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get_or_fetch(QueryKey::Trending, fetch).await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let cache: QuoteCache<u32> = QuoteCache::new(Duration::from_secs(60), 16);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch =
            move || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(cache.get_or_fetch(QueryKey::Trending, fetch).await, Ok(0));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&QueryKey::Trending).await, None);
        assert_eq!(cache.get_or_fetch(QueryKey::Trending, fetch).await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache: QuoteCache<u32> = QuoteCache::default();
        let key = QueryKey::detail("bitcoin");

        let result = cache
            .get_or_fetch(key.clone(), || async { Err::<u32, _>("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert!(cache.is_empty().await);

        let result = cache
            .get_or_fetch(key, || async { Ok::<_, &str>(5) })
            .await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_expired_then_oldest() {
        let cache: QuoteCache<u32> = QuoteCache::new(Duration::from_secs(60), 2);

        cache.insert(QueryKey::detail("a"), 1).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.insert(QueryKey::detail("b"), 2).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        // "a" is expired and goes first
        cache.insert(QueryKey::detail("c"), 3).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&QueryKey::detail("b")).await, Some(2));

        tokio::time::advance(Duration::from_secs(1)).await;
        // nothing expired: the oldest ("b") is evicted
        cache.insert(QueryKey::detail("d"), 4).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&QueryKey::detail("b")).await, None);
        assert_eq!(cache.get(&QueryKey::detail("c")).await, Some(3));
        assert_eq!(cache.get(&QueryKey::detail("d")).await, Some(4));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache: QuoteCache<u32> = QuoteCache::default();
        cache.insert(QueryKey::Trending, 1).await;
        cache.insert(QueryKey::search("btc"), 2).await;

        cache.invalidate(&QueryKey::Trending).await;
        assert_eq!(cache.get(&QueryKey::Trending).await, None);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let cache: Arc<QuoteCache<u32>> = Arc::new(QuoteCache::default());
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = QueryKey::detail(&format!("coin-{}", i % 4));
                cache
                    .get_or_fetch(key, || async move { Ok::<_, String>(i % 4) })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(cache.len().await, 4);
    }
}
