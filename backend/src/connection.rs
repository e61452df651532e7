use alloy_primitives::U256;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::chains::{self, ChainInfo};
use crate::config::AppConfig;

// balanceOf(address)
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// Read-only access to one chain's JSON-RPC endpoint. Built once at
/// startup and handed to whatever needs chain access.
#[derive(Debug, Clone)]
pub struct ChainConnection {
    pub chain: &'static ChainInfo,
    rpc_url: String,
    http_client: Client,
    timeout: Duration,
}

impl ChainConnection {
    pub fn new(chain: &'static ChainInfo, rpc_url: String, http_client: Client, timeout: Duration) -> Self {
        Self {
            chain,
            rpc_url,
            http_client,
            timeout,
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: Value = self
            .http_client
            .post(&self.rpc_url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(RpcError::Rpc(error.to_string()));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse(format!("missing result in {}", response)))
    }

    pub async fn native_balance(&self, account: &str) -> Result<U256, RpcError> {
        let result = self.rpc_call("eth_getBalance", json!([account, "latest"])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("balance is not a string".to_string()))?;
        parse_quantity(quantity)
    }

    pub async fn erc20_balance(&self, token: &str, account: &str) -> Result<U256, RpcError> {
        let call = json!({
            "to": token,
            "data": balance_of_calldata(account)?,
        });
        let result = self.rpc_call("eth_call", json!([call, "latest"])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("eth_call result is not a string".to_string()))?;
        debug!("balanceOf({}) on {} = {}", account, token, quantity);
        parse_quantity(quantity)
    }
}

/// Parses a hex JSON-RPC quantity or 32-byte word. `0x` alone is zero.
pub fn parse_quantity(raw: &str) -> Result<U256, RpcError> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", raw, e)))
}

pub fn balance_of_calldata(account: &str) -> Result<String, RpcError> {
    let stripped = account.trim().trim_start_matches("0x");
    if stripped.len() != 40 || !stripped.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RpcError::InvalidResponse(format!("invalid account {}", account)));
    }
    Ok(format!("{}{:0>64}", BALANCE_OF_SELECTOR, stripped.to_lowercase()))
}

/// Connections for every supported chain, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct ChainConnections {
    connections: HashMap<u64, ChainConnection>,
}

impl ChainConnections {
    pub fn from_config(config: &AppConfig, http_client: Client) -> Self {
        let mut connections = HashMap::new();
        for chain in chains::all_chains() {
            if let Some(rpc_url) = config.rpc_url_for(chain.chain_id) {
                connections.insert(
                    chain.chain_id,
                    ChainConnection::new(chain, rpc_url, http_client.clone(), config.request_timeout()),
                );
            }
        }
        info!("Prepared RPC connections for {} chains", connections.len());
        Self { connections }
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainConnection> {
        self.connections.get(&chain_id)
    }

    pub fn insert(&mut self, connection: ChainConnection) {
        self.connections.insert(connection.chain.chain_id, connection);
    }
}
