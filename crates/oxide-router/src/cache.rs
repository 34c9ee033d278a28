//! Block cache contract and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::handler::BoxFuture;
use crate::request::PathParams;

/// Rendered output of a cacheable route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBlock {
    /// Block content.
    pub content: String,
    /// Layout override chosen by the handler, if any.
    pub layout: Option<String>,
}

impl CachedBlock {
    /// Serializes the block for string-valued stores.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RouterError::Cache(e.to_string()))
    }

    /// Parses a block produced by [`CachedBlock::encode`].
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RouterError::Cache(e.to_string()))
    }
}

/// Builds the cache key of a block for the given layout and route parameters.
pub fn cache_key(layout: &str, block: &str, params: &PathParams) -> String {
    format!("{layout}::{block}::{}", params.canonical())
}

/// Store for rendered blocks.
///
/// Concurrent misses on the same key may both write; content is
/// deterministic per key, so the last write wins.
pub trait BlockCache: Send + Sync {
    /// Returns whether a live entry exists.
    fn check<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Fetches an entry.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CachedBlock>>>;

    /// Stores an entry for `ttl`.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: CachedBlock,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Process-local block cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((raw, expires)) if *expires > Instant::now() => Some(raw.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Returns the number of stored entries, including any that expired
    /// since the last write.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockCache for MemoryCache {
    fn check<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.live(key).is_some()) })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CachedBlock>>> {
        Box::pin(async move { self.live(key).map(|raw| CachedBlock::decode(&raw)).transpose() })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: CachedBlock,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let raw = value.encode()?;
            let now = Instant::now();
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            // Expired entries go on every write, whether read since or not.
            entries.retain(|_, (_, expires)| *expires > now);
            entries.insert(key.to_string(), (raw, now + ttl));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(content: &str) -> CachedBlock {
        CachedBlock {
            content: content.to_string(),
            layout: None,
        }
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let mut a = PathParams::new();
        a.insert("b", "2");
        a.insert("a", "1");
        assert_eq!(cache_key("default", "content.show", &a), "default::content.show::a=1&b=2");
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        assert!(!cache.check("k").await.unwrap());
        cache
            .set("k", block("<p>hi</p>"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.check("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(block("<p>hi</p>")));
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache.set("k", block("x"), Duration::ZERO).await.unwrap();
        assert!(!cache.check("k").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("stale.a", block("a"), Duration::ZERO).await.unwrap();
        cache.set("stale.b", block("b"), Duration::ZERO).await.unwrap();
        cache
            .set("fresh", block("c"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.check("fresh").await.unwrap());
    }
}
