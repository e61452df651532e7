use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::{info, warn};

use super::models::{AdminEntry, StoredConfig};
use crate::admin_config::AdminConfig;
use crate::types::normalize_address;

/// Server-side storage for the allow-list and per-admin configs. Addresses
/// are normalized before they reach an implementation.
#[async_trait]
pub trait AdminRepository: Send + Sync {
    async fn is_admin(&self, address: &str) -> Result<bool>;
    async fn list_admins(&self) -> Result<Vec<AdminEntry>>;
    /// `false` when the address was already listed.
    async fn add_admin(&self, address: &str) -> Result<bool>;
    /// `false` when the address was not listed.
    async fn remove_admin(&self, address: &str) -> Result<bool>;
    async fn get_config(&self, admin_address: &str) -> Result<Option<AdminConfig>>;
    /// Most recently saved config by any admin.
    async fn latest_config(&self) -> Result<Option<AdminConfig>>;
    async fn upsert_config(&self, admin_address: &str, config: &AdminConfig) -> Result<()>;
}

/// Adds every address in `admins` that is not yet listed.
pub async fn seed_admins(repository: &dyn AdminRepository, admins: &[String]) -> Result<usize> {
    let mut added = 0;
    for admin in admins {
        if repository.add_admin(&normalize_address(admin)).await? {
            added += 1;
        }
    }
    if added > 0 {
        info!("Seeded {} initial admins", added);
    }
    Ok(added)
}

fn decode_config(row: StoredConfig) -> Option<AdminConfig> {
    match serde_json::from_str(&row.config) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Stored config for {} is unreadable: {}", row.admin_address, e);
            None
        }
    }
}

pub struct PgAdminRepository {
    pool: PgPool,
}

impl PgAdminRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminRepository for PgAdminRepository {
    async fn is_admin(&self, address: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM admin_addresses WHERE address = $1)")
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_admins(&self) -> Result<Vec<AdminEntry>> {
        let admins = sqlx::query_as::<_, AdminEntry>(
            "SELECT address, added_at FROM admin_addresses ORDER BY added_at, address",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(admins)
    }

    async fn add_admin(&self, address: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO admin_addresses (address, added_at) VALUES ($1, NOW()) ON CONFLICT (address) DO NOTHING",
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_admin(&self, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM admin_addresses WHERE address = $1")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_config(&self, admin_address: &str) -> Result<Option<AdminConfig>> {
        let row = sqlx::query_as::<_, StoredConfig>(
            "SELECT admin_address, config, updated_at FROM admin_config WHERE admin_address = $1",
        )
        .bind(admin_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(decode_config))
    }

    async fn latest_config(&self) -> Result<Option<AdminConfig>> {
        let row = sqlx::query_as::<_, StoredConfig>(
            "SELECT admin_address, config, updated_at FROM admin_config ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(decode_config))
    }

    async fn upsert_config(&self, admin_address: &str, config: &AdminConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_config (admin_address, config, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (admin_address) DO UPDATE SET
                config = EXCLUDED.config,
                updated_at = NOW()
            "#,
        )
        .bind(admin_address)
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await?;

        info!("Stored admin config for {}", admin_address);
        Ok(())
    }
}

/// In-process repository used when no database is configured.
#[derive(Default)]
pub struct MemoryAdminRepository {
    admins: DashMap<String, AdminEntry>,
    configs: DashMap<String, StoredConfig>,
}

impl MemoryAdminRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminRepository for MemoryAdminRepository {
    async fn is_admin(&self, address: &str) -> Result<bool> {
        Ok(self.admins.contains_key(address))
    }

    async fn list_admins(&self) -> Result<Vec<AdminEntry>> {
        let mut admins: Vec<AdminEntry> = self.admins.iter().map(|entry| entry.value().clone()).collect();
        admins.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.address.cmp(&b.address)));
        Ok(admins)
    }

    async fn add_admin(&self, address: &str) -> Result<bool> {
        if self.admins.contains_key(address) {
            return Ok(false);
        }
        let entry = AdminEntry {
            address: address.to_string(),
            added_at: Utc::now(),
        };
        Ok(self.admins.insert(address.to_string(), entry).is_none())
    }

    async fn remove_admin(&self, address: &str) -> Result<bool> {
        Ok(self.admins.remove(address).is_some())
    }

    async fn get_config(&self, admin_address: &str) -> Result<Option<AdminConfig>> {
        Ok(self
            .configs
            .get(admin_address)
            .and_then(|row| decode_config(row.value().clone())))
    }

    async fn latest_config(&self) -> Result<Option<AdminConfig>> {
        let latest = self
            .configs
            .iter()
            .max_by_key(|row| row.value().updated_at)
            .map(|row| row.value().clone());
        Ok(latest.and_then(decode_config))
    }

    async fn upsert_config(&self, admin_address: &str, config: &AdminConfig) -> Result<()> {
        let row = StoredConfig {
            admin_address: admin_address.to_string(),
            config: serde_json::to_string(config)?,
            updated_at: Utc::now(),
        };
        self.configs.insert(admin_address.to_string(), row);
        Ok(())
    }
}
