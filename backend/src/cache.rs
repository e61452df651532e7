use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::storage::{get_json, put_json, KeyValueStore, StorageError};
use crate::token_registry::TokenEntry;
use crate::types::{normalize_address, now_millis};

pub const DEFAULT_CACHE_MAX_AGE_MINUTES: i64 = 10;
pub const DEFAULT_MIN_BACKGROUND_INTERVAL_MS: i64 = 30_000;

/// Snapshot of one account's tokens on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tokens: Vec<TokenEntry>,
    /// Epoch millis of the refresh that produced `tokens`.
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn KeyValueStore>,
    max_age_minutes: i64,
}

impl TokenCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_max_age(store, DEFAULT_CACHE_MAX_AGE_MINUTES)
    }

    pub fn with_max_age(store: Arc<dyn KeyValueStore>, max_age_minutes: i64) -> Self {
        Self {
            store,
            max_age_minutes,
        }
    }

    pub fn generate_cache_key(account: &str, chain_id: u64) -> String {
        format!("tokens:{}:{}", normalize_address(account), chain_id)
    }

    fn last_update_key(account: &str, chain_id: u64) -> String {
        format!("tokens_last_update:{}:{}", normalize_address(account), chain_id)
    }

    pub async fn get(&self, account: &str, chain_id: u64) -> Result<Option<CacheEntry>, StorageError> {
        let key = Self::generate_cache_key(account, chain_id);
        match get_json::<CacheEntry>(self.store.as_ref(), &key).await {
            Ok(Some(entry)) => {
                debug!("Cache hit for key: {}", key);
                Ok(Some(entry))
            }
            Ok(None) => {
                debug!("Cache miss for key: {}", key);
                Ok(None)
            }
            Err(StorageError::Serde(e)) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the entry for (account, chain) with `tokens`. The stored
    /// timestamp never moves backwards, even if the clock does.
    pub async fn put(
        &self,
        account: &str,
        chain_id: u64,
        tokens: Vec<TokenEntry>,
    ) -> Result<CacheEntry, StorageError> {
        let key = Self::generate_cache_key(account, chain_id);
        let previous = self.get(account, chain_id).await?.map(|entry| entry.timestamp);
        let timestamp = previous.map_or(now_millis(), |prev| prev.max(now_millis()));

        let entry = CacheEntry { tokens, timestamp };
        put_json(self.store.as_ref(), &key, &entry).await?;
        info!("Cached {} tokens with key: {}", entry.tokens.len(), key);
        Ok(entry)
    }

    pub async fn invalidate(&self, account: &str, chain_id: u64) -> Result<(), StorageError> {
        self.store.remove(&Self::generate_cache_key(account, chain_id)).await
    }

    pub fn is_expired(timestamp: i64, max_age_minutes: i64) -> bool {
        Self::is_expired_at(timestamp, max_age_minutes, now_millis())
    }

    pub fn is_expired_at(timestamp: i64, max_age_minutes: i64, now: i64) -> bool {
        now.saturating_sub(timestamp) > max_age_minutes.saturating_mul(60_000)
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        !Self::is_expired(entry.timestamp, self.max_age_minutes)
    }

    pub fn max_age_minutes(&self) -> i64 {
        self.max_age_minutes
    }

    pub async fn mark_updated(&self, account: &str, chain_id: u64) -> Result<(), StorageError> {
        let key = Self::last_update_key(account, chain_id);
        put_json(self.store.as_ref(), &key, &now_millis()).await
    }

    pub async fn last_updated(&self, account: &str, chain_id: u64) -> Result<Option<i64>, StorageError> {
        get_json(self.store.as_ref(), &Self::last_update_key(account, chain_id)).await
    }

    /// Whether enough time has passed since the last marked update for a
    /// background refresh. Storage failures allow the refresh.
    pub async fn can_background_update(&self, account: &str, chain_id: u64, min_interval_ms: i64) -> bool {
        match self.last_updated(account, chain_id).await {
            Ok(Some(last)) => now_millis().saturating_sub(last) >= min_interval_ms,
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to read last update marker for {}:{}: {}", account, chain_id, e);
                true
            }
        }
    }
}
