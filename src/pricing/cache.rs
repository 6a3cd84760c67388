use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::pricing::{PriceKind, PricingOracle};

const DEFAULT_MAX_ENTRIES: usize = 1_024;

type CacheKey = (String, String, PriceKind);

fn capacity(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}

/// Reuses successful lookups for `ttl`, keeping at most `max_entries` prices
/// and evicting the least recently used one. Failures are never cached.
#[derive(Debug)]
pub struct CachedPricing<P> {
    inner: P,
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, (f64, Instant)>>,
}

impl<P: PricingOracle> CachedPricing<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(LruCache::new(capacity(DEFAULT_MAX_ENTRIES))),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.entries.get_mut().resize(capacity(max_entries));
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, instance_type: &str, region: &str, kind: PriceKind) -> bool {
        let key = (instance_type.to_string(), region.to_string(), kind);
        self.entries.lock().await.contains(&key)
    }
}

#[async_trait]
impl<P: PricingOracle> PricingOracle for CachedPricing<P> {
    async fn price(&self, instance_type: &str, region: &str, kind: PriceKind) -> Result<f64> {
        let key = (instance_type.to_string(), region.to_string(), kind);
        {
            let mut entries = self.entries.lock().await;
            match entries.get(&key).copied() {
                Some((price, fetched_at)) if fetched_at.elapsed() < self.ttl => {
                    tracing::debug!(instance_type, region, kind = %kind, "Price cache hit");
                    return Ok(price);
                }
                Some(_) => {
                    entries.pop(&key);
                }
                None => {}
            }
        }

        let price = self.inner.price(instance_type, region, kind).await?;
        self.entries
            .lock()
            .await
            .put(key, (price, Instant::now()));
        Ok(price)
    }
}
