use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

use crate::chains;
use crate::types::{is_valid_address, normalize_address};

/// Upper bound on `CACHE_MAX_AGE_MINUTES`: one week.
pub const MAX_CACHE_AGE_MINUTES: i64 = 7 * 24 * 60;

/// Runtime configuration, resolved once at startup and injected everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    /// Base URL of the admin-config API the config store talks to.
    pub admin_api_url: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// JSON file backing the local key-value store when Redis is not configured.
    pub local_store_path: Option<String>,
    pub request_timeout_seconds: u64,
    pub cache_max_age_minutes: i64,
    pub min_refresh_interval_seconds: u64,
    pub initial_admins: Vec<String>,
    pub api_keys: ProviderKeys,
    /// Per-chain RPC endpoint overrides keyed by chain id.
    pub rpc_overrides: HashMap<u64, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    pub etherscan: Option<String>,
    pub alchemy: Option<String>,
    pub coingecko: Option<String>,
    pub coinmarketcap: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            admin_api_url: "http://127.0.0.1:3000/api/admin".to_string(),
            database_url: None,
            redis_url: None,
            local_store_path: None,
            request_timeout_seconds: 12,
            cache_max_age_minutes: 10,
            min_refresh_interval_seconds: 30,
            initial_admins: Vec::new(),
            api_keys: ProviderKeys::default(),
            rpc_overrides: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        info!("Loading configuration from: {}", path);

        if !std::path::Path::new(path).exists() {
            warn!("Configuration file not found at {}, creating default config", path);
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Configuration saved to: {}", path);
        Ok(())
    }

    pub fn load_from_env() -> Self {
        Self::load_from_lookup(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup` (normally the process environment) on top of defaults.
    pub fn load_from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(bind) = non_empty("BIND_ADDRESS") {
            config.bind_address = bind;
        }
        if let Some(url) = non_empty("ADMIN_API_URL") {
            config.admin_api_url = url.trim_end_matches('/').to_string();
        }
        config.database_url = non_empty("DATABASE_URL");
        config.redis_url = non_empty("REDIS_URL");
        config.local_store_path = non_empty("LOCAL_STORE_PATH");

        if let Some(timeout) = non_empty("REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            config.request_timeout_seconds = timeout;
        }
        if let Some(max_age) = non_empty("CACHE_MAX_AGE_MINUTES").and_then(|v| v.parse().ok()) {
            config.cache_max_age_minutes = max_age;
        }
        if let Some(interval) = non_empty("MIN_REFRESH_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
            config.min_refresh_interval_seconds = interval;
        }

        if let Some(admins) = non_empty("INITIAL_ADMINS") {
            config.initial_admins = admins
                .split(',')
                .map(normalize_address)
                .filter(|address| !address.is_empty())
                .collect();
        }

        config.api_keys = ProviderKeys {
            etherscan: non_empty("ETHERSCAN_API_KEY"),
            alchemy: non_empty("ALCHEMY_API_KEY"),
            coingecko: non_empty("COINGECKO_API_KEY"),
            coinmarketcap: non_empty("COINMARKETCAP_API_KEY"),
        };

        for chain_id in chains::supported_chain_ids() {
            if let Some(rpc_url) = non_empty(&format!("RPC_URL_{}", chain_id)) {
                info!("Loaded custom RPC URL for chain {}", chain_id);
                config.rpc_overrides.insert(chain_id, rpc_url);
            }
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_seconds)
    }

    pub fn rpc_url_for(&self, chain_id: u64) -> Option<String> {
        self.rpc_overrides
            .get(&chain_id)
            .cloned()
            .or_else(|| chains::get_chain(chain_id).map(|chain| chain.rpc_url.to_string()))
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        }
        if !self.admin_api_url.starts_with("http") {
            errors.push(format!("Admin API URL must be http(s): {}", self.admin_api_url));
        }
        if self.request_timeout_seconds == 0 {
            errors.push("Request timeout cannot be zero".to_string());
        }
        if !(0..=MAX_CACHE_AGE_MINUTES).contains(&self.cache_max_age_minutes) {
            errors.push(format!(
                "Cache max age must be between 0 and {} minutes",
                MAX_CACHE_AGE_MINUTES
            ));
        }
        if self.min_refresh_interval_seconds == 0 {
            errors.push("Minimum refresh interval cannot be zero".to_string());
        }
        for admin in &self.initial_admins {
            if !is_valid_address(admin) {
                errors.push(format!("Initial admin {} is not a valid address", admin));
            }
        }
        for chain_id in self.rpc_overrides.keys() {
            if !chains::is_supported(*chain_id) {
                errors.push(format!("RPC override for unsupported chain {}", chain_id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
