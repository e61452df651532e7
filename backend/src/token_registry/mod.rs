pub mod discovery_engine;
pub mod filters;
pub mod price_aggregator;
pub mod scheduler;
pub mod token_sources;

pub use discovery_engine::{
    PipelineError, PipelineSnapshot, PipelineStatus, RefreshMode, RefreshOutcome, SkipReason,
    TokenDiscoveryService,
};
pub use filters::{apply_view, total_value_usd, usd_value, TokenViewOptions, LOW_VALUE_THRESHOLD_USD};
pub use price_aggregator::{PriceAggregator, PriceKey, PRICE_PRIORITY};
pub use scheduler::TokenRefreshScheduler;
pub use token_sources::{PriceQuery, PriceSource, ProviderError, TokenSource};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One token held by an account on one chain, with its USD price.
/// Snapshots are replaced wholesale on refresh, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEntry {
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Integer amount in the token's smallest unit, base 10.
    pub balance: String,
    pub chain_id: u64,
    /// Zero when no price source knew the token.
    #[serde(rename = "priceUSD")]
    pub price_usd: Decimal,
}

/// Balance reported by a token source, before pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTokenBalance {
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub balance: String,
    pub chain_id: u64,
    pub coingecko_id: Option<String>,
    pub source: String,
}

impl RawTokenBalance {
    pub fn into_entry(self, price_usd: Decimal) -> TokenEntry {
        TokenEntry {
            contract_address: self.contract_address,
            symbol: self.symbol,
            name: self.name,
            decimals: self.decimals,
            balance: self.balance,
            chain_id: self.chain_id,
            price_usd,
        }
    }

    pub fn price_query(&self) -> PriceQuery {
        PriceQuery {
            contract_address: self.contract_address.clone(),
            chain_id: self.chain_id,
            symbol: Some(self.symbol.clone()).filter(|s| !s.is_empty()),
            coingecko_id: self.coingecko_id.clone(),
        }
    }
}
