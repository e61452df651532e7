use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{RefreshMode, RefreshOutcome, TokenDiscoveryService};
use crate::admin_config::MIN_REFRESH_INTERVAL;

/// Handle on one spawned refresh loop and the signal that ends it.
struct LoopTask {
    handle: JoinHandle<()>,
    stop_signal: Arc<Notify>,
}

/// Periodically re-runs a background refresh for every watched pair. The
/// period comes from the admin config and is re-read on every cycle.
pub struct TokenRefreshScheduler {
    discovery_service: Arc<TokenDiscoveryService>,
    task: Mutex<Option<LoopTask>>,
    last_run: Arc<RwLock<Option<Instant>>>,
}

impl TokenRefreshScheduler {
    pub fn new(discovery_service: Arc<TokenDiscoveryService>) -> Self {
        Self {
            discovery_service,
            task: Mutex::new(None),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Token refresh scheduler is already running");
            return;
        }

        info!("Starting token refresh scheduler");

        let discovery_service = Arc::clone(&self.discovery_service);
        let last_run_clone = Arc::clone(&self.last_run);
        let stop_signal = Arc::new(Notify::new());
        let loop_stop = Arc::clone(&stop_signal);

        let handle = tokio::spawn(async move {
            loop {
                let interval = current_interval(&discovery_service).await;
                debug!("Next background refresh in {} seconds", interval.as_secs());

                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = loop_stop.notified() => break,
                }

                let refreshed = run_cycle(&discovery_service).await;
                *last_run_clone.write().await = Some(Instant::now());
                info!("Background refresh cycle completed: {} pairs refreshed", refreshed);
            }
            info!("Token refresh loop exited");
        });

        *task = Some(LoopTask { handle, stop_signal });
    }

    /// Signals the loop and waits for it to exit. A cycle already running
    /// finishes first.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(LoopTask { handle, stop_signal }) = task.take() else {
            debug!("Token refresh scheduler is not running");
            return;
        };

        stop_signal.notify_one();
        if let Err(e) = handle.await {
            warn!("Token refresh loop ended abnormally: {}", e);
        }
        info!("Token refresh scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    pub async fn last_run_time(&self) -> Option<Instant> {
        *self.last_run.read().await
    }

    /// Runs one background cycle now, outside the timer.
    pub async fn trigger_immediate_run(&self) -> usize {
        let refreshed = run_cycle(&self.discovery_service).await;
        *self.last_run.write().await = Some(Instant::now());
        refreshed
    }
}

async fn current_interval(discovery_service: &TokenDiscoveryService) -> Duration {
    let loaded = discovery_service.config_store().load(None, false).await;
    clamp_interval(loaded.config.refresh_interval())
}

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_REFRESH_INTERVAL)
}

/// Background-refreshes every watched pair, returning how many actually refreshed.
async fn run_cycle(discovery_service: &TokenDiscoveryService) -> usize {
    let mut refreshed = 0;
    for (account, chain_id) in discovery_service.watched_pairs() {
        match discovery_service.refresh(&account, chain_id, RefreshMode::Background).await {
            RefreshOutcome::Refreshed { .. } => refreshed += 1,
            outcome => debug!("Background refresh for {} on chain {}: {:?}", account, chain_id, outcome),
        }
    }
    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_config::AdminConfigStore;
    use crate::cache::TokenCache;
    use crate::config::AppConfig;
    use crate::connection::{ChainConnection, ChainConnections};
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::token_registry::token_sources::{ProviderError, TokenSource};
    use crate::token_registry::{PriceAggregator, RawTokenBalance};
    use async_trait::async_trait;
    use reqwest::Client;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl TokenSource for CountingSource {
        fn source_name(&self) -> &str {
            "etherscan"
        }

        async fn fetch_tokens(
            &self,
            _account: &str,
            _connection: &ChainConnection,
        ) -> Result<Vec<RawTokenBalance>, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn service(source: Arc<CountingSource>, min_interval: Duration) -> Arc<TokenDiscoveryService> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let token_source: Arc<dyn TokenSource> = source;
        Arc::new(
            TokenDiscoveryService::new(
                Arc::new(ChainConnections::from_config(&AppConfig::default(), Client::new())),
                vec![token_source],
                PriceAggregator::new(Vec::new(), Duration::from_secs(1)),
                TokenCache::new(store.clone()),
                Arc::new(AdminConfigStore::new(None, store)),
            )
            .with_min_background_interval(min_interval),
        )
    }

    #[test]
    fn test_interval_is_clamped() {
        assert_eq!(clamp_interval(Duration::from_secs(1)), MIN_REFRESH_INTERVAL);
        assert_eq!(clamp_interval(Duration::from_secs(600)), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let scheduler = TokenRefreshScheduler::new(service(Arc::new(CountingSource(AtomicUsize::new(0))), Duration::ZERO));
        assert!(!scheduler.is_running().await);

        scheduler.start().await;
        assert!(scheduler.is_running().await);
        // Second start is a no-op
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_waits_for_the_loop_to_exit() {
        let scheduler = TokenRefreshScheduler::new(service(Arc::new(CountingSource(AtomicUsize::new(0))), Duration::ZERO));

        scheduler.start().await;
        let first_loop = {
            let task = scheduler.task.lock().await;
            task.as_ref().map(|t| t.handle.abort_handle()).unwrap()
        };
        scheduler.stop().await;
        assert!(first_loop.is_finished());
        scheduler.start().await;

        let handle_finished = {
            let task = scheduler.task.lock().await;
            task.as_ref().map(|t| t.handle.is_finished())
        };
        assert_eq!(handle_finished, Some(false));

        scheduler.stop().await;
        assert!(scheduler.task.lock().await.is_none());
        // Stopping twice is harmless.
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_cycle_refreshes_watched_pairs() {
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let service = service(source.clone(), Duration::ZERO);
        service.watch("0x742d35Cc6634C0532925a3b8D4C9db1C4C5C5C5C", 1).await;
        service.watch("0x742d35Cc6634C0532925a3b8D4C9db1C4C5C5C5C", 137).await;
        assert_eq!(source.0.load(Ordering::SeqCst), 2);

        let scheduler = TokenRefreshScheduler::new(service);
        assert_eq!(scheduler.trigger_immediate_run().await, 2);
        assert_eq!(source.0.load(Ordering::SeqCst), 4);
        assert!(scheduler.last_run_time().await.is_some());
    }

    #[tokio::test]
    async fn test_cycle_respects_last_update_marker() {
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let service = service(source.clone(), Duration::from_secs(30));
        service.watch("0x742d35Cc6634C0532925a3b8D4C9db1C4C5C5C5C", 1).await;

        let scheduler = TokenRefreshScheduler::new(service);
        assert_eq!(scheduler.trigger_immediate_run().await, 0);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }
}
