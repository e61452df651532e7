use futures::stream::{self, StreamExt};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::token_sources::{fetch_price_soft, usable_price, PriceQuery, PriceSource, ALCHEMY, COINGECKO, COINMARKETCAP, DEFILLAMA};
use crate::admin_config::AdminConfig;
use crate::types::normalize_address;

/// Price sources in the order they are tried.
pub const PRICE_PRIORITY: [&str; 4] = [DEFILLAMA, COINGECKO, COINMARKETCAP, ALCHEMY];

const BATCH_CONCURRENCY: usize = 8;

/// Batch result key: lowercase contract address plus chain id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub contract_address: String,
    pub chain_id: u64,
}

impl PriceKey {
    pub fn new(contract_address: &str, chain_id: u64) -> Self {
        Self {
            contract_address: normalize_address(contract_address),
            chain_id,
        }
    }
}

impl From<&PriceQuery> for PriceKey {
    fn from(query: &PriceQuery) -> Self {
        Self::new(&query.contract_address, query.chain_id)
    }
}

pub struct PriceAggregator {
    sources: Vec<Arc<dyn PriceSource>>,
    budget: Duration,
}

impl PriceAggregator {
    /// `sources` must already be in priority order.
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, budget: Duration) -> Self {
        Self { sources, budget }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.source_name()).collect()
    }

    /// First usable price from the enabled sources, in priority order.
    /// Zero means no source knew the token.
    pub async fn fetch_token_price_with_fallback(&self, query: &PriceQuery, config: &AdminConfig) -> Decimal {
        for source in &self.sources {
            let name = source.source_name();
            if !config.price_service_enabled(name) {
                continue;
            }

            let Some(price) = fetch_price_soft(source.as_ref(), query, self.budget).await else {
                continue;
            };
            match usable_price(price).and_then(Decimal::from_f64) {
                Some(price) => {
                    debug!("Price for {} on chain {} from {}: {}", query.contract_address, query.chain_id, name, price);
                    return price;
                }
                None => debug!("Ignoring unusable price {} from {}", price, name),
            }
        }

        debug!("No price found for {} on chain {}", query.contract_address, query.chain_id);
        Decimal::ZERO
    }

    /// Prices many tokens concurrently. Every distinct query gets an entry,
    /// zero when unpriced.
    pub async fn fetch_prices_batch(&self, queries: &[PriceQuery], config: &AdminConfig) -> HashMap<PriceKey, Decimal> {
        let mut unique: HashMap<PriceKey, PriceQuery> = HashMap::new();
        for query in queries {
            unique.entry(PriceKey::from(query)).or_insert_with(|| query.clone());
        }

        let prices: HashMap<PriceKey, Decimal> = stream::iter(unique)
            .map(|(key, query)| async move {
                let price = self.fetch_token_price_with_fallback(&query, config).await;
                (key, price)
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        let priced = prices.values().filter(|p| !p.is_zero()).count();
        info!("Priced {}/{} tokens", priced, prices.len());
        prices
    }
}

/// Looks up a batch result, treating a missing key as unpriced.
pub fn price_or_zero(prices: &HashMap<PriceKey, Decimal>, contract_address: &str, chain_id: u64) -> Decimal {
    prices
        .get(&PriceKey::new(contract_address, chain_id))
        .copied()
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_registry::token_sources::ProviderError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Price(f64),
        Fail,
        Nothing,
    }

    struct MockPriceSource {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockPriceSource {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceSource for MockPriceSource {
        fn source_name(&self) -> &str {
            self.name
        }

        async fn fetch_token_price(&self, _query: &PriceQuery) -> Result<Option<f64>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Price(price) => Ok(Some(price)),
                Behavior::Fail => Err(ProviderError::Api("boom".to_string())),
                Behavior::Nothing => Ok(None),
            }
        }
    }

    fn query(address: &str) -> PriceQuery {
        PriceQuery {
            contract_address: address.to_string(),
            chain_id: 1,
            symbol: Some("TKN".to_string()),
            coingecko_id: None,
        }
    }

    fn toggles(entries: &[(&str, bool)]) -> AdminConfig {
        let mut config = AdminConfig::default();
        config.price_services = entries
            .iter()
            .map(|(name, enabled)| (name.to_string(), *enabled))
            .collect();
        config
    }

    fn aggregator(sources: &[Arc<MockPriceSource>]) -> PriceAggregator {
        let sources = sources
            .iter()
            .map(|s| {
                let source: Arc<dyn PriceSource> = s.clone();
                source
            })
            .collect();
        PriceAggregator::new(sources, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_usable_price() {
        let a = MockPriceSource::new("a", Behavior::Price(9.0));
        let b = MockPriceSource::new("b", Behavior::Fail);
        let c = MockPriceSource::new("c", Behavior::Price(2.5));
        let d = MockPriceSource::new("d", Behavior::Price(7.0));
        let config = toggles(&[("a", false), ("b", true), ("c", true), ("d", true)]);

        let price = aggregator(&[a.clone(), b.clone(), c.clone(), d.clone()])
            .fetch_token_price_with_fallback(&query("0x1"), &config)
            .await;

        assert_eq!(price, dec!(2.5));
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
        assert_eq!(d.calls(), 0);
    }

    #[tokio::test]
    async fn test_total_failure_returns_zero() {
        let a = MockPriceSource::new("a", Behavior::Fail);
        let b = MockPriceSource::new("b", Behavior::Nothing);
        let c = MockPriceSource::new("c", Behavior::Price(f64::NAN));
        let d = MockPriceSource::new("d", Behavior::Price(-4.0));
        let config = toggles(&[("a", true), ("b", true), ("c", true), ("d", true)]);

        let price = aggregator(&[a, b, c, d])
            .fetch_token_price_with_fallback(&query("0x1"), &config)
            .await;
        assert_eq!(price, Decimal::ZERO);

        let e = MockPriceSource::new("e", Behavior::Price(1.0));
        let price = aggregator(&[e.clone()])
            .fetch_token_price_with_fallback(&query("0x1"), &toggles(&[("e", false)]))
            .await;
        assert_eq!(price, Decimal::ZERO);
        assert_eq!(e.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_is_a_usable_price() {
        let a = MockPriceSource::new("a", Behavior::Price(0.0));
        let b = MockPriceSource::new("b", Behavior::Price(3.0));
        let config = toggles(&[("a", true), ("b", true)]);

        let price = aggregator(&[a, b.clone()])
            .fetch_token_price_with_fallback(&query("0x1"), &config)
            .await;
        assert_eq!(price, Decimal::ZERO);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_dedups_and_defaults_to_zero() {
        let a = MockPriceSource::new("a", Behavior::Price(1.5));
        let config = toggles(&[("a", true)]);
        let queries = vec![query("0xAbC"), query("0xabc"), query("0xdef")];

        let prices = aggregator(&[a.clone()]).fetch_prices_batch(&queries, &config).await;

        assert_eq!(prices.len(), 2);
        assert_eq!(a.calls(), 2);
        assert_eq!(price_or_zero(&prices, "0xABC", 1), dec!(1.5));
        assert_eq!(price_or_zero(&prices, "0xdef", 1), dec!(1.5));
        assert_eq!(price_or_zero(&prices, "0xabc", 137), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_batch_runs_on_a_spawned_task() {
        let a = MockPriceSource::new("a", Behavior::Price(4.0));
        let prices = Arc::new(aggregator(&[a.clone()]));
        let config = toggles(&[("a", true)]);
        let queries = vec![query("0x1"), query("0x2")];

        let handle = tokio::spawn(async move { prices.fetch_prices_batch(&queries, &config).await });
        let batch = handle.await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(price_or_zero(&batch, "0x2", 1), dec!(4));
        assert_eq!(a.calls(), 2);
    }
}
