use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One address on the admin allow-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AdminEntry {
    pub address: String,
    pub added_at: DateTime<Utc>,
}

/// Admin config row. `config` holds the JSON document as text.
#[derive(Debug, Clone, FromRow)]
pub struct StoredConfig {
    pub admin_address: String,
    pub config: String,
    pub updated_at: DateTime<Utc>,
}
