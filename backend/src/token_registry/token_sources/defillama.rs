use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{skip_unconfigured, usable_price, PriceQuery, PriceSource, ProviderError, DEFILLAMA};
use crate::chains;
use crate::types::is_native;

const DEFILLAMA_URL: &str = "https://coins.llama.fi";

/// DefiLlama coins API. Keyless, so it is always available on chains it indexes.
pub struct DefiLlamaPriceSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl DefiLlamaPriceSource {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            base_url: DEFILLAMA_URL.to_string(),
            timeout,
        }
    }
}

/// Coin key in DefiLlama's `chain:address` form. Native tokens are looked up
/// by their CoinGecko id.
pub fn coin_key(query: &PriceQuery) -> Option<String> {
    let chain = chains::get_chain(query.chain_id)?;
    if is_native(&query.contract_address) {
        let id = query.coingecko_id.as_deref().unwrap_or(chain.coingecko_native_id);
        return Some(format!("coingecko:{}", id));
    }
    chain
        .defillama_chain
        .map(|prefix| format!("{}:{}", prefix, query.contract_address.to_lowercase()))
}

pub fn parse_price(response: &Value, key: &str) -> Option<f64> {
    let coins = response.get("coins")?.as_object()?;
    // Keys echo the request but may differ in address casing.
    coins
        .get(key)
        .or_else(|| {
            coins
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })?
        .get("price")?
        .as_f64()
        .and_then(usable_price)
}

#[async_trait]
impl PriceSource for DefiLlamaPriceSource {
    fn source_name(&self) -> &str {
        DEFILLAMA
    }

    async fn fetch_token_price(&self, query: &PriceQuery) -> Result<Option<f64>, ProviderError> {
        let Some(key) = coin_key(query) else {
            skip_unconfigured(DEFILLAMA, "chain not indexed");
            return Ok(None);
        };

        let url = format!("{}/prices/current/{}", self.base_url, key);
        let response: Value = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;

        Ok(parse_price(&response, &key))
    }
}
