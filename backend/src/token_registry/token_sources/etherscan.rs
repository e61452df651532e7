use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{skip_unconfigured, ProviderError, TokenSource, ETHERSCAN, MAX_TOKENS_PER_CALL};
use crate::connection::ChainConnection;
use crate::token_registry::RawTokenBalance;
use crate::types::{normalize_address, NATIVE_TOKEN_ADDRESS};

const ETHERSCAN_V2_URL: &str = "https://api.etherscan.io/v2/api";
/// Number of most recent token transfers scanned for candidate contracts.
const TRANSFER_WINDOW: usize = 100;
const BALANCE_CONCURRENCY: usize = 8;

/// Token contract seen in the account's transfer history.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenCandidate {
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Explorer-backed discovery: the transfer history names the candidate
/// contracts, the chain connection supplies current balances.
pub struct EtherscanTokenSource {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl EtherscanTokenSource {
    pub fn new(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            base_url: ETHERSCAN_V2_URL.to_string(),
            timeout,
        }
    }

    async fn fetch_candidates(
        &self,
        api_key: &str,
        account: &str,
        chain_id: u64,
    ) -> Result<Vec<TokenCandidate>, ProviderError> {
        let response: Value = self
            .client
            .get(&self.base_url)
            .query(&[
                ("chainid", chain_id.to_string()),
                ("module", "account".to_string()),
                ("action", "tokentx".to_string()),
                ("address", account.to_string()),
                ("page", "1".to_string()),
                ("offset", TRANSFER_WINDOW.to_string()),
                ("sort", "desc".to_string()),
                ("apikey", api_key.to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;

        parse_token_transfers(&response)
    }
}

/// Extracts unique token contracts from a `tokentx` response, keeping the
/// metadata of the first transfer seen per contract and at most
/// `MAX_TOKENS_PER_CALL` contracts.
pub fn parse_token_transfers(response: &Value) -> Result<Vec<TokenCandidate>, ProviderError> {
    let status = response.get("status").and_then(|v| v.as_str()).unwrap_or("0");
    let result = response.get("result");

    let transfers = match result.and_then(|r| r.as_array()) {
        Some(transfers) => transfers,
        None => {
            let message = result
                .and_then(|r| r.as_str())
                .or_else(|| response.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unexpected response format");
            return Err(ProviderError::Api(format!("Etherscan error: {}", message)));
        }
    };

    // status "0" with an empty array means "No transactions found"
    if status != "1" && !transfers.is_empty() {
        return Err(ProviderError::Api("Etherscan returned status 0".to_string()));
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for transfer in transfers {
        let Some(address) = transfer.get("contractAddress").and_then(|v| v.as_str()) else {
            continue;
        };
        let address = normalize_address(address);
        if address.is_empty() || !seen.insert(address.clone()) {
            continue;
        }

        candidates.push(TokenCandidate {
            contract_address: address,
            symbol: transfer
                .get("tokenSymbol")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
            name: transfer
                .get("tokenName")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown Token")
                .to_string(),
            decimals: transfer
                .get("tokenDecimal")
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse().ok())
                .unwrap_or(18),
        });

        if candidates.len() >= MAX_TOKENS_PER_CALL {
            break;
        }
    }

    Ok(candidates)
}

#[async_trait]
impl TokenSource for EtherscanTokenSource {
    fn source_name(&self) -> &str {
        ETHERSCAN
    }

    async fn fetch_tokens(
        &self,
        account: &str,
        connection: &ChainConnection,
    ) -> Result<Vec<RawTokenBalance>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            skip_unconfigured(ETHERSCAN, "no API key configured");
            return Ok(Vec::new());
        };

        let chain = connection.chain;
        let candidates = self.fetch_candidates(api_key, account, chain.chain_id).await?;
        debug!("Etherscan found {} candidate tokens on chain {}", candidates.len(), chain.chain_id);

        let mut tokens = Vec::with_capacity(candidates.len() + 1);

        match connection.native_balance(account).await {
            Ok(balance) => tokens.push(RawTokenBalance {
                contract_address: NATIVE_TOKEN_ADDRESS.to_string(),
                symbol: chain.native_symbol.to_string(),
                name: chain.native_name.to_string(),
                decimals: chain.native_decimals,
                balance: balance.to_string(),
                chain_id: chain.chain_id,
                coingecko_id: Some(chain.coingecko_native_id.to_string()),
                source: ETHERSCAN.to_string(),
            }),
            Err(e) => debug!("Native balance lookup failed on chain {}: {}", chain.chain_id, e),
        }

        // Zero balances are kept; filtering happens at the view layer.
        let balances: Vec<Option<RawTokenBalance>> = stream::iter(candidates)
            .map(|candidate| async move {
                match connection.erc20_balance(&candidate.contract_address, account).await {
                    Ok(balance) => Some(RawTokenBalance {
                        contract_address: candidate.contract_address,
                        symbol: candidate.symbol,
                        name: candidate.name,
                        decimals: candidate.decimals,
                        balance: balance.to_string(),
                        chain_id: chain.chain_id,
                        coingecko_id: None,
                        source: ETHERSCAN.to_string(),
                    }),
                    Err(e) => {
                        debug!("Skipping {}: balance lookup failed: {}", candidate.contract_address, e);
                        None
                    }
                }
            })
            .buffered(BALANCE_CONCURRENCY)
            .collect()
            .await;

        tokens.extend(balances.into_iter().flatten());
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains;
    use serde_json::json;

    fn transfer(address: &str, symbol: &str, decimals: &str) -> Value {
        json!({
            "contractAddress": address,
            "tokenSymbol": symbol,
            "tokenName": format!("{} Token", symbol),
            "tokenDecimal": decimals,
        })
    }

    #[test]
    fn test_parse_dedups_by_address_first_seen_wins() {
        let response = json!({
            "status": "1",
            "message": "OK",
            "result": [
                transfer("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", "6"),
                transfer("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "FAKE", "18"),
                transfer("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI", "18"),
            ]
        });

        let candidates = parse_token_transfers(&response).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].symbol, "USDC");
        assert_eq!(candidates[0].decimals, 6);
        assert_eq!(candidates[0].contract_address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(candidates[1].symbol, "DAI");
    }

    #[test]
    fn test_parse_caps_candidates() {
        let transfers: Vec<Value> = (0..120)
            .map(|i| transfer(&format!("0x{:040x}", i + 1), "TKN", "18"))
            .collect();
        let response = json!({ "status": "1", "message": "OK", "result": transfers });

        let candidates = parse_token_transfers(&response).unwrap();
        assert_eq!(candidates.len(), MAX_TOKENS_PER_CALL);
    }

    #[test]
    fn test_parse_no_transactions() {
        let response = json!({ "status": "0", "message": "No transactions found", "result": [] });
        assert!(parse_token_transfers(&response).unwrap().is_empty());
    }

    #[test]
    fn test_parse_api_error() {
        let response = json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" });
        let err = parse_token_transfers(&response).unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[tokio::test]
    async fn test_missing_api_key_returns_empty() {
        let source = EtherscanTokenSource::new(Client::new(), None, Duration::from_secs(1));
        let chain = chains::get_chain(1).unwrap();
        let connection = ChainConnection::new(chain, "http://127.0.0.1:9".to_string(), Client::new(), Duration::from_secs(1));

        let tokens = source
            .fetch_tokens("0x742d35Cc6634C0532925a3b8D4C9db1C4C5C5C5C", &connection)
            .await
            .unwrap();
        assert!(tokens.is_empty());
    }
}
