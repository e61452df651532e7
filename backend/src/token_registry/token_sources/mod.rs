pub mod alchemy;
pub mod coingecko;
pub mod coinmarketcap;
pub mod defillama;
pub mod etherscan;

pub use alchemy::AlchemySource;
pub use coingecko::CoinGeckoPriceSource;
pub use coinmarketcap::CoinMarketCapPriceSource;
pub use defillama::DefiLlamaPriceSource;
pub use etherscan::EtherscanTokenSource;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RawTokenBalance;
use crate::config::AppConfig;
use crate::connection::{ChainConnection, RpcError};

pub const ETHERSCAN: &str = "etherscan";
pub const ALCHEMY: &str = "alchemy";
pub const DEFILLAMA: &str = "defillama";
pub const COINGECKO: &str = "coingecko";
pub const COINMARKETCAP: &str = "coinmarketcap";

/// Token sources in the order their results are merged.
pub const TOKEN_SOURCE_ORDER: [&str; 2] = [ETHERSCAN, ALCHEMY];

/// Caps the number of token contracts a single source processes per call.
pub const MAX_TOKENS_PER_CALL: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC call failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("API error: {0}")]
    Api(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Price lookup for one token. Hints help sources that key by id or symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceQuery {
    pub contract_address: String,
    pub chain_id: u64,
    pub symbol: Option<String>,
    pub coingecko_id: Option<String>,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Lists the account's balances on the connection's chain. A source
    /// without credentials or chain support returns an empty list.
    async fn fetch_tokens(
        &self,
        account: &str,
        connection: &ChainConnection,
    ) -> Result<Vec<RawTokenBalance>, ProviderError>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// USD price of one token, `None` when the source has no answer.
    async fn fetch_token_price(&self, query: &PriceQuery) -> Result<Option<f64>, ProviderError>;
}

/// Runs a token source under `budget`, turning every failure into an empty list.
pub async fn fetch_tokens_soft(
    source: &dyn TokenSource,
    account: &str,
    connection: &ChainConnection,
    budget: Duration,
) -> Vec<RawTokenBalance> {
    let name = source.source_name();
    match tokio::time::timeout(budget, source.fetch_tokens(account, connection)).await {
        Ok(Ok(tokens)) => {
            info!("Fetched {} tokens from {} on chain {}", tokens.len(), name, connection.chain.chain_id);
            tokens
        }
        Ok(Err(e)) => {
            warn!("Failed to fetch tokens from {}: {}", name, e);
            Vec::new()
        }
        Err(_) => {
            warn!("Failed to fetch tokens from {}: {}", name, ProviderError::Timeout(budget));
            Vec::new()
        }
    }
}

/// Runs a price source under `budget`, turning every failure into `None`.
pub async fn fetch_price_soft(source: &dyn PriceSource, query: &PriceQuery, budget: Duration) -> Option<f64> {
    let name = source.source_name();
    match tokio::time::timeout(budget, source.fetch_token_price(query)).await {
        Ok(Ok(price)) => price,
        Ok(Err(e)) => {
            warn!("{} price lookup failed for {}: {}", name, query.contract_address, e);
            None
        }
        Err(_) => {
            warn!("{} price lookup timed out for {}", name, query.contract_address);
            None
        }
    }
}

pub(crate) fn skip_unconfigured(source: &str, reason: &str) {
    debug!("Skipping {}: {}", source, reason);
}

/// Builds the token sources in merge order.
pub fn build_token_sources(config: &AppConfig, client: Client) -> Vec<Arc<dyn TokenSource>> {
    let timeout = config.request_timeout();
    let etherscan: Arc<dyn TokenSource> = Arc::new(EtherscanTokenSource::new(
        client.clone(),
        config.api_keys.etherscan.clone(),
        timeout,
    ));
    let alchemy: Arc<dyn TokenSource> = Arc::new(AlchemySource::new(client, config.api_keys.alchemy.clone(), timeout));
    vec![etherscan, alchemy]
}

/// Builds the price sources in fallback priority order.
pub fn build_price_sources(config: &AppConfig, client: Client) -> Vec<Arc<dyn PriceSource>> {
    let timeout = config.request_timeout();
    let defillama: Arc<dyn PriceSource> = Arc::new(DefiLlamaPriceSource::new(client.clone(), timeout));
    let coingecko: Arc<dyn PriceSource> = Arc::new(CoinGeckoPriceSource::new(
        client.clone(),
        config.api_keys.coingecko.clone(),
        timeout,
    ));
    let coinmarketcap: Arc<dyn PriceSource> = Arc::new(CoinMarketCapPriceSource::new(
        client.clone(),
        config.api_keys.coinmarketcap.clone(),
        timeout,
    ));
    let alchemy: Arc<dyn PriceSource> = Arc::new(AlchemySource::new(client, config.api_keys.alchemy.clone(), timeout));
    vec![defillama, coingecko, coinmarketcap, alchemy]
}

/// Accepts only prices a caller can multiply with: finite and non-negative.
pub fn usable_price(price: f64) -> Option<f64> {
    if price.is_finite() && price >= 0.0 {
        Some(price)
    } else {
        None
    }
}
