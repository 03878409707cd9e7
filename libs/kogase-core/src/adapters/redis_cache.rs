use crate::{Cache, CoreError};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

/// Redis implementation of the Cache port using redis-rs.
///
/// Every key is stored under `{namespace}:` so several deployments (or other
/// services) can share one Redis without reading each other's project keys.
#[derive(Clone, Debug)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    namespace: String,
    default_ttl_seconds: u64,
}

impl RedisCache {
    pub async fn new(
        redis_url: &str,
        namespace: &str,
        default_ttl_seconds: u64,
    ) -> Result<Self, CoreError> {
        let namespace = namespace.trim().trim_end_matches(':');
        if namespace.is_empty() {
            return Err(CoreError::Configuration(
                "Redis key namespace must not be empty".into(),
            ));
        }
        let client = Client::open(redis_url)
            .map_err(|e| CoreError::Configuration(format!("Invalid Redis URL: {}", e)))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CoreError::Infrastructure(Box::new(e)))?;
        info!("Redis cache connected under namespace '{}'.", namespace);
        Ok(Self {
            connection,
            namespace: namespace.to_string(),
            default_ttl_seconds,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let mut conn = self.connection.clone();
        conn.get(self.namespaced(key))
            .await
            .map_err(|e| CoreError::Infrastructure(Box::new(e)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<(), CoreError> {
        let mut conn = self.connection.clone();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        conn.set_ex(self.namespaced(key), value, ttl)
            .await
            .map_err(|e| CoreError::Infrastructure(Box::new(e)))
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.connection.clone();
        conn.del(self.namespaced(key))
            .await
            .map(|_: usize| ())
            .map_err(|e| CoreError::Infrastructure(Box::new(e)))
    }
}

// --- Integration Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use testcontainers::{ContainerAsync, runners::AsyncRunner};
    use testcontainers_modules::redis::Redis as RedisImage;
    use tokio::time::sleep;

    async fn start_redis() -> (String, ContainerAsync<RedisImage>) {
        let node = RedisImage::default()
            .start()
            .await
            .expect("Failed to start Redis container");
        let port = node
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get host port");
        (format!("redis://localhost:{}/", port), node)
    }

    async fn setup_cache(default_ttl_seconds: u64) -> (RedisCache, ContainerAsync<RedisImage>) {
        let (url, node) = start_redis().await;
        let cache = RedisCache::new(&url, "kogase", default_ttl_seconds)
            .await
            .expect("Failed to connect to testcontainer Redis");
        (cache, node)
    }

    #[tokio::test]
    async fn set_get_and_delete() {
        let (cache, _node) = setup_cache(60).await;
        let value = b"f47ac10b-58cc-4372-a567-0e02b2c3d479".to_vec();

        cache.set("project_key:abc", &value, None).await.expect("SET failed");
        assert_eq!(cache.get("project_key:abc").await.expect("GET failed"), Some(value));

        cache.delete("project_key:abc").await.expect("DEL failed");
        assert_eq!(cache.get("project_key:abc").await.expect("GET failed"), None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (cache, _node) = setup_cache(3600).await;
        cache.set("short", b"v", Some(1)).await.expect("SET failed");
        assert_eq!(cache.get("short").await.expect("GET failed"), Some(b"v".to_vec()));

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("short").await.expect("GET failed"), None);
    }

    #[tokio::test]
    async fn namespaces_do_not_share_entries() {
        let (url, _node) = start_redis().await;
        let staging = RedisCache::new(&url, "staging", 60).await.unwrap();
        let production = RedisCache::new(&url, "production:", 60).await.unwrap();

        staging.set("project_key:abc", b"one", None).await.unwrap();
        assert_eq!(production.get("project_key:abc").await.unwrap(), None);

        let client = Client::open(url.as_str()).unwrap();
        let mut raw = client.get_multiplexed_tokio_connection().await.unwrap();
        let stored: Option<Vec<u8>> = raw.get("staging:project_key:abc").await.unwrap();
        assert_eq!(stored, Some(b"one".to_vec()));

        production.delete("project_key:abc").await.unwrap();
        assert_eq!(staging.get("project_key:abc").await.unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let bad_url = runtime.block_on(RedisCache::new("not a url", "kogase", 60));
        assert!(matches!(bad_url, Err(CoreError::Configuration(_))));
        let no_namespace = runtime.block_on(RedisCache::new("redis://localhost/", " : ", 60));
        assert!(matches!(no_namespace, Err(CoreError::Configuration(_))));
    }
}
