use crate::{Cache, CoreError};
use async_trait::async_trait;
use moka::{Expiry, future::Cache as MokaCache};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct Entry {
    bytes: Vec<u8>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory implementation of the Cache port using Moka.
/// Used when no Redis URL is configured and by the route tests.
#[derive(Clone, Debug)]
pub struct InMemoryCache {
    cache: MokaCache<String, Entry>,
    default_ttl: Duration,
}

impl InMemoryCache {
    pub fn new(max_capacity: u64, default_ttl_seconds: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            cache,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(10_000, 60)
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.cache.get(key).await.map(|entry| entry.bytes))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<(), CoreError> {
        let ttl = ttl_seconds.map_or(self.default_ttl, Duration::from_secs);
        self.cache
            .insert(
                key.to_string(),
                Entry {
                    bytes: value.to_vec(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
