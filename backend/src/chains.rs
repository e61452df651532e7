use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;

/// Static network metadata for one supported chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub name: &'static str,
    pub native_symbol: &'static str,
    pub native_name: &'static str,
    pub native_decimals: u8,
    pub explorer_url: &'static str,
    pub rpc_url: &'static str,
    /// Subdomain prefix of the Alchemy endpoint, e.g. `eth-mainnet`.
    pub alchemy_network: Option<&'static str>,
    pub coingecko_platform: Option<&'static str>,
    pub coingecko_native_id: &'static str,
    pub defillama_chain: Option<&'static str>,
}

static CHAINS: Lazy<BTreeMap<u64, ChainInfo>> = Lazy::new(|| {
    let chains = [
        ChainInfo {
            chain_id: 1,
            name: "Ethereum",
            native_symbol: "ETH",
            native_name: "Ether",
            native_decimals: 18,
            explorer_url: "https://etherscan.io",
            rpc_url: "https://ethereum-rpc.publicnode.com",
            alchemy_network: Some("eth-mainnet"),
            coingecko_platform: Some("ethereum"),
            coingecko_native_id: "ethereum",
            defillama_chain: Some("ethereum"),
        },
        ChainInfo {
            chain_id: 11155111,
            name: "Sepolia",
            native_symbol: "ETH",
            native_name: "Sepolia Ether",
            native_decimals: 18,
            explorer_url: "https://sepolia.etherscan.io",
            rpc_url: "https://ethereum-sepolia-rpc.publicnode.com",
            alchemy_network: Some("eth-sepolia"),
            coingecko_platform: None,
            coingecko_native_id: "ethereum",
            defillama_chain: None,
        },
        ChainInfo {
            chain_id: 10,
            name: "Optimism",
            native_symbol: "ETH",
            native_name: "Ether",
            native_decimals: 18,
            explorer_url: "https://optimistic.etherscan.io",
            rpc_url: "https://mainnet.optimism.io",
            alchemy_network: Some("opt-mainnet"),
            coingecko_platform: Some("optimistic-ethereum"),
            coingecko_native_id: "ethereum",
            defillama_chain: Some("optimism"),
        },
        ChainInfo {
            chain_id: 56,
            name: "BNB Chain",
            native_symbol: "BNB",
            native_name: "BNB",
            native_decimals: 18,
            explorer_url: "https://bscscan.com",
            rpc_url: "https://bsc-dataseed1.binance.org",
            alchemy_network: Some("bnb-mainnet"),
            coingecko_platform: Some("binance-smart-chain"),
            coingecko_native_id: "binancecoin",
            defillama_chain: Some("bsc"),
        },
        ChainInfo {
            chain_id: 137,
            name: "Polygon",
            native_symbol: "POL",
            native_name: "Polygon Ecosystem Token",
            native_decimals: 18,
            explorer_url: "https://polygonscan.com",
            rpc_url: "https://polygon-rpc.com",
            alchemy_network: Some("polygon-mainnet"),
            coingecko_platform: Some("polygon-pos"),
            coingecko_native_id: "polygon-ecosystem-token",
            defillama_chain: Some("polygon"),
        },
        ChainInfo {
            chain_id: 8453,
            name: "Base",
            native_symbol: "ETH",
            native_name: "Ether",
            native_decimals: 18,
            explorer_url: "https://basescan.org",
            rpc_url: "https://mainnet.base.org",
            alchemy_network: Some("base-mainnet"),
            coingecko_platform: Some("base"),
            coingecko_native_id: "ethereum",
            defillama_chain: Some("base"),
        },
        ChainInfo {
            chain_id: 42161,
            name: "Arbitrum",
            native_symbol: "ETH",
            native_name: "Ether",
            native_decimals: 18,
            explorer_url: "https://arbiscan.io",
            rpc_url: "https://arb1.arbitrum.io/rpc",
            alchemy_network: Some("arb-mainnet"),
            coingecko_platform: Some("arbitrum-one"),
            coingecko_native_id: "ethereum",
            defillama_chain: Some("arbitrum"),
        },
        ChainInfo {
            chain_id: 43114,
            name: "Avalanche",
            native_symbol: "AVAX",
            native_name: "Avalanche",
            native_decimals: 18,
            explorer_url: "https://snowtrace.io",
            rpc_url: "https://api.avax.network/ext/bc/C/rpc",
            alchemy_network: Some("avax-mainnet"),
            coingecko_platform: Some("avalanche"),
            coingecko_native_id: "avalanche-2",
            defillama_chain: Some("avax"),
        },
    ];

    chains.into_iter().map(|chain| (chain.chain_id, chain)).collect()
});

pub fn get_chain(chain_id: u64) -> Option<&'static ChainInfo> {
    CHAINS.get(&chain_id)
}

pub fn is_supported(chain_id: u64) -> bool {
    CHAINS.contains_key(&chain_id)
}

pub fn supported_chain_ids() -> Vec<u64> {
    CHAINS.keys().copied().collect()
}

pub fn all_chains() -> Vec<&'static ChainInfo> {
    CHAINS.values().collect()
}
