use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use tokenvault_backend::admin_config::{
    AdminConfig, AdminConfigStore, ConfigError, ConfigOrigin, ConfigRepository, RemoteConfigRepository,
};
use tokenvault_backend::api::{create_admin_router, AdminApiState};
use tokenvault_backend::database::{AdminRepository, MemoryAdminRepository};
use tokenvault_backend::storage::{KeyValueStore, MemoryStore};

const ADMIN: &str = "0x742d35cc6634c0532925a3b8d4c9db1c4c5c5c5c";
const NEWCOMER: &str = "0x1111111111111111111111111111111111111111";
const STRANGER: &str = "0x2222222222222222222222222222222222222222";

/// Serves the admin router on an ephemeral local port and returns its base URL.
async fn spawn_admin_server() -> String {
    let repository = Arc::new(MemoryAdminRepository::new());
    repository.add_admin(ADMIN).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = create_admin_router().with_state(AdminApiState::new(repository));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", address)
}

/// Base URL on which nothing is listening.
async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", address)
}

fn remote(base_url: &str) -> RemoteConfigRepository {
    RemoteConfigRepository::new(Client::new(), base_url, Duration::from_secs(5))
}

fn store_for(base_url: &str) -> AdminConfigStore {
    let server: Arc<dyn ConfigRepository> = Arc::new(remote(base_url));
    let local: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    AdminConfigStore::new(Some(server), local)
}

fn custom_config() -> AdminConfig {
    let mut config = AdminConfig::default();
    config.update_interval_minutes = 15;
    config.price_services.insert("coinmarketcap".to_string(), true);
    config.token_services.insert("alchemy".to_string(), false);
    config
}

#[tokio::test]
async fn test_allow_list_round_trip() {
    let base_url = spawn_admin_server().await;
    let client = remote(&base_url);

    assert_eq!(client.get_admins(ADMIN).await.unwrap(), vec![ADMIN.to_string()]);

    client.add_admin(ADMIN, NEWCOMER).await.unwrap();
    let admins = client.get_admins(ADMIN).await.unwrap();
    assert_eq!(admins.len(), 2);
    assert!(admins.contains(&NEWCOMER.to_string()));

    let again = client.add_admin(ADMIN, NEWCOMER).await;
    assert!(matches!(again, Err(ConfigError::Conflict)));
    assert_eq!(client.get_admins(ADMIN).await.unwrap(), admins);

    let own = client.remove_admin(ADMIN, ADMIN).await;
    assert!(matches!(own, Err(ConfigError::SelfRemoval)));

    client.remove_admin(ADMIN, NEWCOMER).await.unwrap();
    let missing = client.remove_admin(ADMIN, NEWCOMER).await;
    assert!(matches!(missing, Err(ConfigError::NotFound)));

    let forbidden = client.get_admins(STRANGER).await;
    assert!(matches!(forbidden, Err(ConfigError::Forbidden)));
}

#[tokio::test]
async fn test_save_then_load_from_server() {
    let base_url = spawn_admin_server().await;
    let store = store_for(&base_url);
    let mut changes = store.subscribe();

    let before = store.load(Some(ADMIN), true).await;
    assert_eq!(before.origin, ConfigOrigin::Default);
    assert!(before.server_error.is_none());

    let config = custom_config();
    store.save(&config, ADMIN).await.unwrap();
    assert_eq!(changes.recv().await.unwrap(), config);

    let loaded = store.load(Some(ADMIN), true).await;
    assert_eq!(loaded.origin, ConfigOrigin::Server);
    assert_eq!(loaded.config, config);

    // A fresh client with no local mirror reads the same config read-only.
    let reader = store_for(&base_url);
    let public = reader.load(Some(STRANGER), false).await;
    assert_eq!(public.origin, ConfigOrigin::Server);
    assert_eq!(public.config, config);
}

#[tokio::test]
async fn test_forbidden_save_still_mirrors_locally() {
    let base_url = spawn_admin_server().await;
    let store = store_for(&base_url);
    let mut changes = store.subscribe();

    let config = custom_config();
    let result = store.save(&config, STRANGER).await;
    assert!(matches!(result, Err(ConfigError::Forbidden)));
    assert_eq!(changes.recv().await.unwrap(), config);

    let loaded = store.load(Some(STRANGER), true).await;
    assert_eq!(loaded.origin, ConfigOrigin::Local);
    assert_eq!(loaded.config, config);
    assert!(loaded.server_error.is_some());
}

#[tokio::test]
async fn test_invalid_config_never_leaves_the_client() {
    let base_url = spawn_admin_server().await;
    let store = store_for(&base_url);

    let mut config = AdminConfig::default();
    config.update_interval_minutes = 0;
    let result = store.save(&config, ADMIN).await;
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let loaded = store.load(Some(ADMIN), true).await;
    assert_eq!(loaded.origin, ConfigOrigin::Default);
}

#[tokio::test]
async fn test_unreachable_server_falls_back() {
    let store = store_for(&unreachable_url().await);

    let loaded = store.load(None, false).await;
    assert_eq!(loaded.origin, ConfigOrigin::Default);
    assert_eq!(loaded.config, AdminConfig::default());

    let config = custom_config();
    store.save_local(&config).await.unwrap();
    let loaded = store.load(None, false).await;
    assert_eq!(loaded.origin, ConfigOrigin::Local);
    assert_eq!(loaded.config, config);

    store.clear_local().await.unwrap();
    assert_eq!(store.load(None, false).await.origin, ConfigOrigin::Default);
}
