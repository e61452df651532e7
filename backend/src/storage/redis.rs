use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::info;

use super::{KeyValueStore, StorageError};

const KEY_PREFIX: &str = "tokenvault:";

/// Redis-backed store sharing one multiplexed connection across callers.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Using Redis local store at {}", redis_url);

        Ok(Self { connection })
    }
}

fn prefixed(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(prefixed(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(prefixed(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(prefixed(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(prefixed("token_cache:1:0xabc"), "tokenvault:token_cache:1:0xabc");
    }

    #[tokio::test]
    async fn test_bad_url_is_rejected() {
        let result = RedisStore::connect("not a redis url").await;
        assert!(matches!(result, Err(StorageError::Redis(_))));
    }
}
