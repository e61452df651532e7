use anyhow::{anyhow, Context, Result};
use axum::{response::Json, routing::get, Router};
use reqwest::Client;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use tokenvault_backend::{
    admin_config::{AdminConfigStore, ConfigRepository, RemoteConfigRepository},
    api::{create_admin_router, create_tokens_router, AdminApiState, TokensApiState},
    cache::TokenCache,
    chains::supported_chain_ids,
    config::AppConfig,
    connection::ChainConnections,
    database::{seed_admins, AdminRepository, MemoryAdminRepository, MigrationRunner, PgAdminRepository},
    storage::open_store,
    token_registry::{
        token_sources::{build_price_sources, build_token_sources},
        PriceAggregator, TokenDiscoveryService, TokenRefreshScheduler,
    },
};

async fn open_admin_repository(config: &AppConfig) -> Result<Arc<dyn AdminRepository>> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, admin allow-list and configs are kept in memory");
        return Ok(Arc::new(MemoryAdminRepository::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("connecting to Postgres")?;

    let migrations = MigrationRunner::new(pool.clone());
    migrations.run_migrations().await?;
    info!("✅ Database ready ({} admins listed)", migrations.admin_count().await?);

    Ok(Arc::new(PgAdminRepository::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("🚀 Starting token discovery backend");

    let config = AppConfig::load_from_env();
    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join("; ")))?;

    let http_client = Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("building HTTP client")?;

    let store = open_store(config.redis_url.as_deref(), config.local_store_path.as_deref()).await?;
    info!("✅ Local store opened");

    let repository = open_admin_repository(&config).await?;
    seed_admins(repository.as_ref(), &config.initial_admins).await?;

    let remote: Arc<dyn ConfigRepository> = Arc::new(RemoteConfigRepository::new(
        http_client.clone(),
        &config.admin_api_url,
        config.request_timeout(),
    ));
    let config_store = Arc::new(AdminConfigStore::new(Some(remote), store.clone()));

    let connections = Arc::new(ChainConnections::from_config(&config, http_client.clone()));
    let prices = PriceAggregator::new(build_price_sources(&config, http_client.clone()), config.request_timeout());
    info!("Price sources in priority order: {:?}", prices.source_names());
    let discovery = Arc::new(
        TokenDiscoveryService::new(
            connections,
            build_token_sources(&config, http_client),
            prices,
            TokenCache::with_max_age(store, config.cache_max_age_minutes),
            config_store,
        )
        .with_source_budget(config.request_timeout() * 2)
        .with_min_background_interval(config.min_refresh_interval()),
    );
    info!("✅ Token discovery initialized for chains {:?}", supported_chain_ids());

    let scheduler = TokenRefreshScheduler::new(Arc::clone(&discovery));
    scheduler.start().await;

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/admin", create_admin_router().with_state(AdminApiState::new(repository)))
        .nest("/api", create_tokens_router().with_state(TokensApiState::new(discovery)))
        .layer(CorsLayer::permissive());

    info!("🔧 Routes configured:");
    info!("  - /api/admin/* (admin config and allow-list)");
    info!("  - /api/tokens/*, /api/chains (token discovery)");

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("🌐 Listening on {}", config.bind_address);

    axum::serve(listener, app).await?;
    scheduler.stop().await;
    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "tokenvault-backend" }))
}
