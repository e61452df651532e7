use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{skip_unconfigured, usable_price, PriceQuery, PriceSource, ProviderError, COINGECKO};
use crate::chains;
use crate::types::is_native;

const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
const DEMO_KEY_HEADER: &str = "x-cg-demo-api-key";

pub struct CoinGeckoPriceSource {
    client: Client,
    api_key: Option<String>,
    timeout: Duration,
}

/// What to ask CoinGecko for a given query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinGeckoLookup {
    /// `simple/price?ids=`
    CoinId(String),
    /// `simple/token_price/{platform}?contract_addresses=`
    Contract { platform: String, address: String },
}

impl CoinGeckoPriceSource {
    pub fn new(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let mut request = self.client.get(url).query(query).timeout(self.timeout);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header(DEMO_KEY_HEADER, key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!("CoinGecko returned {}", response.status())));
        }
        Ok(response.json().await?)
    }
}

pub fn lookup_for(query: &PriceQuery) -> Option<CoinGeckoLookup> {
    if let Some(id) = query.coingecko_id.as_deref().filter(|id| !id.is_empty()) {
        return Some(CoinGeckoLookup::CoinId(id.to_string()));
    }
    let chain = chains::get_chain(query.chain_id)?;
    if is_native(&query.contract_address) {
        return Some(CoinGeckoLookup::CoinId(chain.coingecko_native_id.to_string()));
    }
    chain.coingecko_platform.map(|platform| CoinGeckoLookup::Contract {
        platform: platform.to_string(),
        address: query.contract_address.to_lowercase(),
    })
}

/// Reads `{ "<key>": { "usd": price } }`, the shape of both simple endpoints.
pub fn parse_usd(response: &Value, key: &str) -> Option<f64> {
    let object = response.as_object()?;
    object
        .get(key)
        .or_else(|| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })?
        .get("usd")?
        .as_f64()
        .and_then(usable_price)
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    fn source_name(&self) -> &str {
        COINGECKO
    }

    async fn fetch_token_price(&self, query: &PriceQuery) -> Result<Option<f64>, ProviderError> {
        let Some(lookup) = lookup_for(query) else {
            skip_unconfigured(COINGECKO, "chain has no asset platform");
            return Ok(None);
        };

        match lookup {
            CoinGeckoLookup::CoinId(id) => {
                let url = format!("{}/simple/price", COINGECKO_URL);
                let response = self
                    .get_json(&url, &[("ids", id.as_str()), ("vs_currencies", "usd")])
                    .await?;
                Ok(parse_usd(&response, &id))
            }
            CoinGeckoLookup::Contract { platform, address } => {
                let url = format!("{}/simple/token_price/{}", COINGECKO_URL, platform);
                let response = self
                    .get_json(&url, &[("contract_addresses", address.as_str()), ("vs_currencies", "usd")])
                    .await?;
                Ok(parse_usd(&response, &address))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NATIVE_TOKEN_ADDRESS;
    use serde_json::json;

    fn query(address: &str, chain_id: u64, coingecko_id: Option<&str>) -> PriceQuery {
        PriceQuery {
            contract_address: address.to_string(),
            chain_id,
            symbol: None,
            coingecko_id: coingecko_id.map(str::to_string),
        }
    }

    #[test]
    fn test_lookup_for() {
        assert_eq!(
            lookup_for(&query(NATIVE_TOKEN_ADDRESS, 56, None)),
            Some(CoinGeckoLookup::CoinId("binancecoin".to_string()))
        );
        assert_eq!(
            lookup_for(&query("0xDAC17F958D2ee523a2206206994597C13D831ec7", 1, None)),
            Some(CoinGeckoLookup::Contract {
                platform: "ethereum".to_string(),
                address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
            })
        );
        // An id hint wins over the contract lookup
        assert_eq!(
            lookup_for(&query("0xdac17f958d2ee523a2206206994597c13d831ec7", 1, Some("tether"))),
            Some(CoinGeckoLookup::CoinId("tether".to_string()))
        );
        assert_eq!(lookup_for(&query("0xdac17f958d2ee523a2206206994597c13d831ec7", 11155111, None)), None);
    }

    #[test]
    fn test_parse_usd() {
        let token = json!({ "0xdac17f958d2ee523a2206206994597c13d831ec7": { "usd": 1.001 } });
        assert_eq!(parse_usd(&token, "0xdac17f958d2ee523a2206206994597c13d831ec7"), Some(1.001));

        let coin = json!({ "ethereum": { "usd": 3312.4 } });
        assert_eq!(parse_usd(&coin, "ethereum"), Some(3312.4));

        assert_eq!(parse_usd(&json!({}), "ethereum"), None);
        assert_eq!(parse_usd(&json!({ "ethereum": {} }), "ethereum"), None);
    }
}
