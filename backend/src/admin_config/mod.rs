pub mod remote;
pub mod store;

pub use remote::RemoteConfigRepository;
pub use store::{AdminConfigStore, ConfigOrigin, DefaultConfigRepository, LoadedConfig, LocalConfigRepository};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::storage::StorageError;
use crate::token_registry::price_aggregator::PRICE_PRIORITY;
use crate::token_registry::token_sources::{ALCHEMY, COINGECKO, COINMARKETCAP, DEFILLAMA, TOKEN_SOURCE_ORDER};

/// Floor for the background refresh period, whatever the config says.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u32 = 5;
pub const MAX_UPDATE_INTERVAL_MINUTES: u32 = 24 * 60;

/// Admin-controlled switches for the token pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    pub token_services: BTreeMap<String, bool>,
    pub price_services: BTreeMap<String, bool>,
    pub update_interval_minutes: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        let token_services = TOKEN_SOURCE_ORDER
            .iter()
            .map(|name| (name.to_string(), true))
            .collect();

        let price_services = [(DEFILLAMA, true), (COINGECKO, true), (COINMARKETCAP, false), (ALCHEMY, false)]
            .into_iter()
            .map(|(name, enabled)| (name.to_string(), enabled))
            .collect();

        Self {
            token_services,
            price_services,
            update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
        }
    }
}

impl AdminConfig {
    /// Missing entries take the default setting, so configs saved before a
    /// source existed keep working.
    pub fn token_service_enabled(&self, name: &str) -> bool {
        match self.token_services.get(name) {
            Some(enabled) => *enabled,
            None => Self::default().token_services.get(name).copied().unwrap_or(false),
        }
    }

    pub fn price_service_enabled(&self, name: &str) -> bool {
        match self.price_services.get(name) {
            Some(enabled) => *enabled,
            None => Self::default().price_services.get(name).copied().unwrap_or(false),
        }
    }

    /// Background refresh period, clamped to `MIN_REFRESH_INTERVAL`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval_minutes) * 60).max(MIN_REFRESH_INTERVAL)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_minutes == 0 || self.update_interval_minutes > MAX_UPDATE_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "updateIntervalMinutes must be between 1 and {}",
                MAX_UPDATE_INTERVAL_MINUTES
            )));
        }
        if let Some(name) = self
            .token_services
            .keys()
            .find(|name| !TOKEN_SOURCE_ORDER.contains(&name.as_str()))
        {
            return Err(ConfigError::Invalid(format!("unknown token service: {}", name)));
        }
        if let Some(name) = self
            .price_services
            .keys()
            .find(|name| !PRICE_PRIORITY.contains(&name.as_str()))
        {
            return Err(ConfigError::Invalid(format!("unknown price service: {}", name)));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Forbidden: address is not on the admin allow-list")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Address is already an admin")]
    Conflict,
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Admins cannot remove themselves")]
    SelfRemoval,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Unexpected response {status}: {body}")]
    Unexpected { status: u16, body: String },
}

/// Who is asking, and whether they claim admin rights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRequest {
    pub caller: Option<String>,
    pub admin_context: bool,
}

impl ConfigRequest {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn admin(address: impl Into<String>) -> Self {
        Self {
            caller: Some(address.into()),
            admin_context: true,
        }
    }

    pub fn user(address: Option<String>) -> Self {
        Self {
            caller: address,
            admin_context: false,
        }
    }
}

/// One link of the server -> local -> defaults chain.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when this repository holds no config.
    async fn get(&self, request: &ConfigRequest) -> Result<Option<AdminConfig>, ConfigError>;

    async fn put(&self, config: &AdminConfig, admin: &str) -> Result<(), ConfigError>;
}
