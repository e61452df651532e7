use anyhow::Result;
use sqlx::{PgPool, Row};
use tracing::info;

/// Schema statements, applied in order on every start. All are idempotent.
const SCHEMA: [(&str, &str); 3] = [
    (
        "admin_addresses",
        r#"
        CREATE TABLE IF NOT EXISTS admin_addresses (
            address VARCHAR(42) PRIMARY KEY,
            added_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "admin_config",
        r#"
        CREATE TABLE IF NOT EXISTS admin_config (
            admin_address VARCHAR(42) PRIMARY KEY,
            config TEXT NOT NULL,
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "admin_config_updated_at_idx",
        "CREATE INDEX IF NOT EXISTS admin_config_updated_at_idx ON admin_config (updated_at DESC)",
    ),
];

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Ensuring admin schema");
        for (name, sql) in SCHEMA {
            sqlx::query(sql).execute(&self.pool).await?;
            info!("Schema object {} ready", name);
        }
        Ok(())
    }

    pub async fn admin_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM admin_addresses")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}
