pub mod file;
pub mod memory;
pub mod redis;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Process-local persistent key-value storage. Values are whole JSON
/// documents: every `put` replaces the previous value in one step.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub async fn get_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let serialized = serde_json::to_string(value)?;
    store.put(key, serialized).await
}

/// Picks the backing store: Redis when a URL is configured, then a JSON
/// file, then memory.
pub async fn open_store(
    redis_url: Option<&str>,
    file_path: Option<&str>,
) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    if let Some(url) = redis_url {
        return Ok(Arc::new(RedisStore::connect(url).await?));
    }
    if let Some(path) = file_path {
        return Ok(Arc::new(FileStore::open(path)?));
    }
    Ok(Arc::new(MemoryStore::new()))
}
