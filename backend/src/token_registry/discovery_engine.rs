use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::price_aggregator::{price_or_zero, PriceAggregator};
use super::token_sources::{fetch_tokens_soft, TokenSource};
use super::{RawTokenBalance, TokenEntry};
use crate::admin_config::{AdminConfig, AdminConfigStore};
use crate::cache::TokenCache;
use crate::connection::{ChainConnection, ChainConnections};
use crate::storage::StorageError;
use crate::types::{is_valid_address, normalize_address};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid account address: {0}")]
    InvalidAddress(String),
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),
    #[error("Cache error: {0}")]
    Cache(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum PipelineStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// What a watcher of one (account, chain) pair currently sees. Tokens from
/// the last good refresh stay in place while loading or after an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub tokens: Vec<TokenEntry>,
    pub last_updated: Option<i64>,
}

impl PipelineSnapshot {
    fn idle() -> Self {
        Self {
            status: PipelineStatus::Idle,
            tokens: Vec::new(),
            last_updated: None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            PipelineStatus::Error(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// User-triggered: shows `Loading` and may be served from a fresh cache.
    Foreground,
    /// Timer-triggered: silent, rate-limited by the last-update marker.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    TooSoon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    CacheHit { tokens: usize },
    Refreshed { tokens: usize },
    Skipped { reason: SkipReason },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    account: String,
    chain_id: u64,
}

impl PipelineKey {
    fn new(account: &str, chain_id: u64) -> Self {
        Self {
            account: normalize_address(account),
            chain_id,
        }
    }
}

/// Marks a key as in flight until dropped.
struct InFlightGuard {
    in_flight: Arc<DashSet<PipelineKey>>,
    key: PipelineKey,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<DashSet<PipelineKey>>, key: &PipelineKey) -> Option<Self> {
        if in_flight.insert(key.clone()) {
            Some(Self {
                in_flight: Arc::clone(in_flight),
                key: key.clone(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

pub struct TokenDiscoveryService {
    connections: Arc<ChainConnections>,
    token_sources: Vec<Arc<dyn TokenSource>>,
    prices: PriceAggregator,
    cache: TokenCache,
    config_store: Arc<AdminConfigStore>,
    source_budget: Duration,
    min_background_interval: Duration,
    states: DashMap<PipelineKey, PipelineSnapshot>,
    watched: DashSet<PipelineKey>,
    in_flight: Arc<DashSet<PipelineKey>>,
}

impl TokenDiscoveryService {
    pub fn new(
        connections: Arc<ChainConnections>,
        token_sources: Vec<Arc<dyn TokenSource>>,
        prices: PriceAggregator,
        cache: TokenCache,
        config_store: Arc<AdminConfigStore>,
    ) -> Self {
        Self {
            connections,
            token_sources,
            prices,
            cache,
            config_store,
            source_budget: Duration::from_secs(15),
            min_background_interval: Duration::from_secs(30),
            states: DashMap::new(),
            watched: DashSet::new(),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Upper bound on one token source call, on top of the per-request timeout.
    pub fn with_source_budget(mut self, budget: Duration) -> Self {
        self.source_budget = budget;
        self
    }

    pub fn with_min_background_interval(mut self, interval: Duration) -> Self {
        self.min_background_interval = interval;
        self
    }

    pub fn config_store(&self) -> &Arc<AdminConfigStore> {
        &self.config_store
    }

    /// Starts tracking the pair and runs a foreground refresh for it.
    pub async fn watch(&self, account: &str, chain_id: u64) -> RefreshOutcome {
        let key = PipelineKey::new(account, chain_id);
        if self.watched.insert(key.clone()) {
            info!("Watching {} on chain {}", key.account, chain_id);
            self.states.insert(key, PipelineSnapshot::idle());
        }
        self.refresh(account, chain_id, RefreshMode::Foreground).await
    }

    /// Stops tracking the pair. Refreshes still running for it complete, but
    /// their results no longer reach the state.
    pub fn unwatch(&self, account: &str, chain_id: u64) {
        let key = PipelineKey::new(account, chain_id);
        self.watched.remove(&key);
        self.states.remove(&key);
    }

    pub fn is_watched(&self, account: &str, chain_id: u64) -> bool {
        self.watched.contains(&PipelineKey::new(account, chain_id))
    }

    pub fn watched_pairs(&self) -> Vec<(String, u64)> {
        self.watched
            .iter()
            .map(|key| (key.account.clone(), key.chain_id))
            .collect()
    }

    pub fn snapshot(&self, account: &str, chain_id: u64) -> Option<PipelineSnapshot> {
        self.states
            .get(&PipelineKey::new(account, chain_id))
            .map(|state| state.value().clone())
    }

    pub async fn refresh(&self, account: &str, chain_id: u64, mode: RefreshMode) -> RefreshOutcome {
        let key = PipelineKey::new(account, chain_id);
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &key) else {
            debug!("Refresh for {} on chain {} already in flight", key.account, chain_id);
            return RefreshOutcome::Skipped {
                reason: SkipReason::InFlight,
            };
        };

        match mode {
            RefreshMode::Foreground => self.update_state(&key, |state| state.status = PipelineStatus::Loading),
            RefreshMode::Background => {
                let min_interval_ms = i64::try_from(self.min_background_interval.as_millis()).unwrap_or(i64::MAX);
                if !self
                    .cache
                    .can_background_update(&key.account, chain_id, min_interval_ms)
                    .await
                {
                    debug!("Background refresh for {} on chain {} too soon", key.account, chain_id);
                    return RefreshOutcome::Skipped {
                        reason: SkipReason::TooSoon,
                    };
                }
            }
        }

        match self.run_refresh(&key, mode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Token refresh failed for {} on chain {}: {}", key.account, chain_id, e);
                let message = e.to_string();
                self.update_state(&key, |state| state.status = PipelineStatus::Error(message.clone()));
                RefreshOutcome::Failed { message }
            }
        }
    }

    async fn run_refresh(&self, key: &PipelineKey, mode: RefreshMode) -> Result<RefreshOutcome, PipelineError> {
        if !is_valid_address(&key.account) {
            return Err(PipelineError::InvalidAddress(key.account.clone()));
        }
        let connection = self
            .connections
            .get(key.chain_id)
            .ok_or(PipelineError::UnsupportedChain(key.chain_id))?;

        if mode == RefreshMode::Foreground {
            if let Some(entry) = self.cache.get(&key.account, key.chain_id).await? {
                if self.cache.is_fresh(&entry) {
                    let count = entry.tokens.len();
                    debug!("Serving {} tokens for {} from cache", count, key.account);
                    self.set_ready(key, entry.tokens, entry.timestamp);
                    return Ok(RefreshOutcome::CacheHit { tokens: count });
                }
            }
        }

        let config = self.config_store.load(None, false).await.config;
        let balances = self.collect_balances(&key.account, connection, &config).await;
        let merged = merge_balances(balances);

        let queries: Vec<_> = merged.iter().map(RawTokenBalance::price_query).collect();
        let prices = self.prices.fetch_prices_batch(&queries, &config).await;

        let tokens: Vec<TokenEntry> = merged
            .into_iter()
            .map(|raw| {
                let price = price_or_zero(&prices, &raw.contract_address, raw.chain_id);
                raw.into_entry(price)
            })
            .collect();

        let entry = self.cache.put(&key.account, key.chain_id, tokens).await?;
        self.cache.mark_updated(&key.account, key.chain_id).await?;

        let count = entry.tokens.len();
        info!("Refreshed {} tokens for {} on chain {}", count, key.account, key.chain_id);
        self.set_ready(key, entry.tokens, entry.timestamp);
        Ok(RefreshOutcome::Refreshed { tokens: count })
    }

    /// Runs every enabled token source concurrently; results keep source order.
    async fn collect_balances(
        &self,
        account: &str,
        connection: &ChainConnection,
        config: &AdminConfig,
    ) -> Vec<RawTokenBalance> {
        let fetches: Vec<_> = self
            .token_sources
            .iter()
            .filter(|source| config.token_service_enabled(source.source_name()))
            .map(|source| fetch_tokens_soft(source.as_ref(), account, connection, self.source_budget))
            .collect();

        if fetches.is_empty() {
            debug!("All token services disabled");
            return Vec::new();
        }

        join_all(fetches).await.into_iter().flatten().collect()
    }

    fn set_ready(&self, key: &PipelineKey, tokens: Vec<TokenEntry>, timestamp: i64) {
        self.update_state(key, move |state| {
            state.status = PipelineStatus::Ready;
            state.tokens = tokens;
            state.last_updated = Some(timestamp);
        });
    }

    fn update_state<F>(&self, key: &PipelineKey, update: F)
    where
        F: FnOnce(&mut PipelineSnapshot),
    {
        // Only `watch` creates a state; an update never brings one back after `unwatch`.
        match self.states.get_mut(key) {
            Some(mut state) => update(state.value_mut()),
            None => debug!("Discarding state update for unwatched {} on chain {}", key.account, key.chain_id),
        }
    }
}

/// Deduplicates balances by lowercase contract address. The first entry
/// seen for an address wins.
pub fn merge_balances(balances: Vec<RawTokenBalance>) -> Vec<RawTokenBalance> {
    let mut seen = HashSet::new();
    balances
        .into_iter()
        .filter_map(|mut balance| {
            balance.contract_address = normalize_address(&balance.contract_address);
            seen.insert(balance.contract_address.clone()).then_some(balance)
        })
        .collect()
}
