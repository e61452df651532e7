use alloy_primitives::U256;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    skip_unconfigured, usable_price, PriceQuery, PriceSource, ProviderError, TokenSource, ALCHEMY,
    MAX_TOKENS_PER_CALL,
};
use crate::chains::{self, ChainInfo};
use crate::connection::{parse_quantity, ChainConnection};
use crate::token_registry::RawTokenBalance;
use crate::types::{is_native, normalize_address, NATIVE_TOKEN_ADDRESS};

const ALCHEMY_PRICES_URL: &str = "https://api.g.alchemy.com/prices/v1";
const METADATA_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Alchemy node-provider adapter. Enumerates ERC20 balances through the
/// enhanced token API and prices tokens through the Prices API.
pub struct AlchemySource {
    client: Client,
    api_key: Option<String>,
    timeout: Duration,
}

impl AlchemySource {
    pub fn new(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }

    fn endpoint(network: &str, api_key: &str) -> String {
        format!("https://{}.g.alchemy.com/v2/{}", network, api_key)
    }

    async fn rpc_call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value, ProviderError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: Value = self
            .client
            .post(endpoint)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(ProviderError::Api(format!("{} failed: {}", method, error)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ProviderError::Api(format!("{} returned no result", method)))
    }

    async fn token_metadata(&self, endpoint: &str, contract: &str) -> Result<TokenMetadata, ProviderError> {
        let result = self
            .rpc_call(endpoint, "alchemy_getTokenMetadata", json!([contract]))
            .await?;
        Ok(parse_token_metadata(&result))
    }

    async fn native_price(&self, api_key: &str, chain: &ChainInfo) -> Result<Option<f64>, ProviderError> {
        let url = format!("{}/{}/tokens/by-symbol", ALCHEMY_PRICES_URL, api_key);
        let response: Value = self
            .client
            .get(&url)
            .query(&[("symbols", chain.native_symbol)])
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;
        Ok(parse_price_response(&response))
    }

    async fn contract_price(
        &self,
        api_key: &str,
        network: &str,
        contract: &str,
    ) -> Result<Option<f64>, ProviderError> {
        let url = format!("{}/{}/tokens/by-address", ALCHEMY_PRICES_URL, api_key);
        let body = json!({
            "addresses": [{ "network": network, "address": contract }]
        });
        let response: Value = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;
        Ok(parse_price_response(&response))
    }
}

/// Non-zero ERC20 balances from an `alchemy_getTokenBalances` result, in
/// response order, capped at `MAX_TOKENS_PER_CALL`.
pub fn parse_token_balances(result: &Value) -> Result<Vec<(String, U256)>, ProviderError> {
    let balances = result
        .get("tokenBalances")
        .and_then(|b| b.as_array())
        .ok_or_else(|| ProviderError::Api("missing tokenBalances".to_string()))?;

    let mut parsed = Vec::new();
    for entry in balances {
        let Some(contract) = entry.get("contractAddress").and_then(|v| v.as_str()) else {
            continue;
        };
        if entry.get("error").map_or(false, |e| !e.is_null()) {
            continue;
        }
        let raw = entry.get("tokenBalance").and_then(|v| v.as_str()).unwrap_or("0x");
        let balance = match parse_quantity(raw) {
            Ok(balance) => balance,
            Err(e) => {
                debug!("Ignoring unreadable balance for {}: {}", contract, e);
                continue;
            }
        };
        if balance.is_zero() {
            continue;
        }
        parsed.push((normalize_address(contract), balance));
        if parsed.len() >= MAX_TOKENS_PER_CALL {
            break;
        }
    }
    Ok(parsed)
}

pub fn parse_token_metadata(result: &Value) -> TokenMetadata {
    TokenMetadata {
        symbol: result
            .get("symbol")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("UNKNOWN")
            .to_string(),
        name: result
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown Token")
            .to_string(),
        decimals: result
            .get("decimals")
            .and_then(|v| v.as_u64())
            .and_then(|d| u8::try_from(d).ok())
            .unwrap_or(18),
    }
}

/// USD value of the first priced entry in a Prices API response.
pub fn parse_price_response(response: &Value) -> Option<f64> {
    let prices = response.get("data")?.as_array()?.first()?.get("prices")?.as_array()?;
    prices
        .iter()
        .find(|p| {
            p.get("currency")
                .and_then(|c| c.as_str())
                .map_or(false, |c| c.eq_ignore_ascii_case("usd"))
        })
        .and_then(|p| p.get("value"))
        .and_then(|v| match v {
            Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        })
        .and_then(usable_price)
}

/// Native balance row from an `eth_getBalance` result. A failed or
/// malformed lookup is logged and leaves the ERC20 rows untouched.
fn native_balance_entry(chain: &ChainInfo, result: Result<Value, ProviderError>) -> Option<RawTokenBalance> {
    let value = match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Alchemy native balance lookup failed on chain {}: {}", chain.chain_id, e);
            return None;
        }
    };
    let balance = match value.as_str().map(parse_quantity) {
        Some(Ok(balance)) => balance,
        Some(Err(e)) => {
            warn!("Alchemy returned an unreadable native balance on chain {}: {}", chain.chain_id, e);
            return None;
        }
        None => {
            warn!("Alchemy returned a non-string native balance on chain {}", chain.chain_id);
            return None;
        }
    };

    Some(RawTokenBalance {
        contract_address: NATIVE_TOKEN_ADDRESS.to_string(),
        symbol: chain.native_symbol.to_string(),
        name: chain.native_name.to_string(),
        decimals: chain.native_decimals,
        balance: balance.to_string(),
        chain_id: chain.chain_id,
        coingecko_id: Some(chain.coingecko_native_id.to_string()),
        source: ALCHEMY.to_string(),
    })
}

#[async_trait]
impl TokenSource for AlchemySource {
    fn source_name(&self) -> &str {
        ALCHEMY
    }

    async fn fetch_tokens(
        &self,
        account: &str,
        connection: &ChainConnection,
    ) -> Result<Vec<RawTokenBalance>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            skip_unconfigured(ALCHEMY, "no API key configured");
            return Ok(Vec::new());
        };
        let chain = connection.chain;
        let Some(network) = chain.alchemy_network else {
            skip_unconfigured(ALCHEMY, "chain not supported");
            return Ok(Vec::new());
        };

        let endpoint = Self::endpoint(network, api_key);
        let result = self
            .rpc_call(&endpoint, "alchemy_getTokenBalances", json!([account, "erc20"]))
            .await?;
        let balances = parse_token_balances(&result)?;
        debug!("Alchemy reported {} non-zero tokens on chain {}", balances.len(), chain.chain_id);

        let mut tokens = Vec::with_capacity(balances.len() + 1);

        let native = self.rpc_call(&endpoint, "eth_getBalance", json!([account, "latest"])).await;
        tokens.extend(native_balance_entry(chain, native));

        let endpoint = endpoint.as_str();
        let entries: Vec<Option<RawTokenBalance>> = stream::iter(balances)
            .map(|(contract, balance)| async move {
                match self.token_metadata(endpoint, &contract).await {
                    Ok(metadata) => Some(RawTokenBalance {
                        contract_address: contract,
                        symbol: metadata.symbol,
                        name: metadata.name,
                        decimals: metadata.decimals,
                        balance: balance.to_string(),
                        chain_id: chain.chain_id,
                        coingecko_id: None,
                        source: ALCHEMY.to_string(),
                    }),
                    Err(e) => {
                        debug!("Skipping {}: metadata lookup failed: {}", contract, e);
                        None
                    }
                }
            })
            .buffered(METADATA_CONCURRENCY)
            .collect()
            .await;

        tokens.extend(entries.into_iter().flatten());
        Ok(tokens)
    }
}

#[async_trait]
impl PriceSource for AlchemySource {
    fn source_name(&self) -> &str {
        ALCHEMY
    }

    async fn fetch_token_price(&self, query: &PriceQuery) -> Result<Option<f64>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            skip_unconfigured(ALCHEMY, "no API key configured");
            return Ok(None);
        };
        let Some(chain) = chains::get_chain(query.chain_id) else {
            skip_unconfigured(ALCHEMY, "chain not supported");
            return Ok(None);
        };

        if is_native(&query.contract_address) {
            return self.native_price(api_key, chain).await;
        }

        let Some(network) = chain.alchemy_network else {
            skip_unconfigured(ALCHEMY, "chain not supported");
            return Ok(None);
        };
        self.contract_price(api_key, network, &query.contract_address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_balance_failure_is_absorbed() {
        let chain = chains::get_chain(1).unwrap();

        let failed = native_balance_entry(chain, Err(ProviderError::Api("rate limited".to_string())));
        assert!(failed.is_none());
        assert!(native_balance_entry(chain, Ok(json!(null))).is_none());
        assert!(native_balance_entry(chain, Ok(json!("0xzz"))).is_none());

        let native = native_balance_entry(chain, Ok(json!("0x1bc16d674ec80000"))).unwrap();
        assert_eq!(native.contract_address, NATIVE_TOKEN_ADDRESS);
        assert_eq!(native.symbol, "ETH");
        assert_eq!(native.balance, "2000000000000000000");
        assert_eq!(native.source, ALCHEMY);
    }

    #[test]
    fn test_parse_token_balances_skips_zero_and_errors() {
        let result = json!({
            "address": "0x742d35cc6634c0532925a3b8d4c9db1c4c5c5c5c",
            "tokenBalances": [
                {
                    "contractAddress": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                    "tokenBalance": "0x00000000000000000000000000000000000000000000000000000000000f4240",
                    "error": null
                },
                {
                    "contractAddress": "0x6b175474e89094c44da98b954eedeac495271d0f",
                    "tokenBalance": "0x0000000000000000000000000000000000000000000000000000000000000000",
                    "error": null
                },
                {
                    "contractAddress": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                    "tokenBalance": null,
                    "error": "execution reverted"
                }
            ]
        });

        let balances = parse_token_balances(&result).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].0, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(balances[0].1, U256::from(1_000_000u64));
    }

    #[test]
    fn test_parse_token_balances_requires_list() {
        assert!(parse_token_balances(&json!({ "foo": 1 })).is_err());
    }

    #[test]
    fn test_parse_token_metadata_defaults() {
        let metadata = parse_token_metadata(&json!({ "decimals": 6, "name": "USD Coin", "symbol": "USDC" }));
        assert_eq!(metadata.symbol, "USDC");
        assert_eq!(metadata.decimals, 6);

        let metadata = parse_token_metadata(&json!({ "decimals": null, "name": "", "symbol": null }));
        assert_eq!(metadata.symbol, "UNKNOWN");
        assert_eq!(metadata.name, "Unknown Token");
        assert_eq!(metadata.decimals, 18);
    }

    #[test]
    fn test_parse_price_response() {
        let response = json!({
            "data": [{
                "network": "eth-mainnet",
                "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                "prices": [{ "currency": "usd", "value": "0.9998", "lastUpdatedAt": "2024-01-01T00:00:00Z" }]
            }]
        });
        assert_eq!(parse_price_response(&response), Some(0.9998));

        let unpriced = json!({ "data": [{ "prices": [], "error": "Token not found" }] });
        assert_eq!(parse_price_response(&unpriced), None);
        assert_eq!(parse_price_response(&json!({ "data": [] })), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_skipped() {
        let source = AlchemySource::new(Client::new(), None, Duration::from_secs(1));
        let query = PriceQuery {
            contract_address: NATIVE_TOKEN_ADDRESS.to_string(),
            chain_id: 1,
            symbol: Some("ETH".to_string()),
            coingecko_id: None,
        };
        assert_eq!(source.fetch_token_price(&query).await.unwrap(), None);
    }
}
