use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AdminConfig, ConfigError, ConfigRepository, ConfigRequest};
use crate::storage::{get_json, put_json, KeyValueStore, StorageError};

pub const LOCAL_CONFIG_KEY: &str = "admin_config";
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Local mirror of the last config seen or saved.
#[derive(Clone)]
pub struct LocalConfigRepository {
    store: Arc<dyn KeyValueStore>,
}

impl LocalConfigRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn remove(&self) -> Result<(), ConfigError> {
        Ok(self.store.remove(LOCAL_CONFIG_KEY).await?)
    }
}

#[async_trait]
impl ConfigRepository for LocalConfigRepository {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, _request: &ConfigRequest) -> Result<Option<AdminConfig>, ConfigError> {
        match get_json(self.store.as_ref(), LOCAL_CONFIG_KEY).await {
            Ok(config) => Ok(config),
            Err(StorageError::Serde(e)) => {
                warn!("Ignoring unreadable local admin config: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, config: &AdminConfig, _admin: &str) -> Result<(), ConfigError> {
        Ok(put_json(self.store.as_ref(), LOCAL_CONFIG_KEY, config).await?)
    }
}

/// Built-in defaults; the last link of the chain. Read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfigRepository;

#[async_trait]
impl ConfigRepository for DefaultConfigRepository {
    fn name(&self) -> &str {
        "default"
    }

    async fn get(&self, _request: &ConfigRequest) -> Result<Option<AdminConfig>, ConfigError> {
        Ok(Some(AdminConfig::default()))
    }

    async fn put(&self, _config: &AdminConfig, _admin: &str) -> Result<(), ConfigError> {
        Err(ConfigError::Invalid("default config is read-only".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Server,
    Local,
    Default,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedConfig {
    pub config: AdminConfig,
    pub origin: ConfigOrigin,
    /// Why the server copy was not used, when it was tried.
    pub server_error: Option<String>,
}

/// Reads through server -> local -> defaults and writes to server and local.
pub struct AdminConfigStore {
    server: Option<Arc<dyn ConfigRepository>>,
    local: LocalConfigRepository,
    defaults: DefaultConfigRepository,
    changes: broadcast::Sender<AdminConfig>,
}

impl AdminConfigStore {
    pub fn new(server: Option<Arc<dyn ConfigRepository>>, local_store: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            server,
            local: LocalConfigRepository::new(local_store),
            defaults: DefaultConfigRepository,
            changes,
        }
    }

    /// Every successful `save` is published here.
    pub fn subscribe(&self) -> broadcast::Receiver<AdminConfig> {
        self.changes.subscribe()
    }

    pub async fn load(&self, caller: Option<&str>, is_admin_context: bool) -> LoadedConfig {
        let request = ConfigRequest {
            caller: caller.map(str::to_string),
            admin_context: is_admin_context,
        };

        let mut server_error = None;
        if let Some(server) = &self.server {
            match server.get(&request).await {
                Ok(Some(config)) => {
                    if let Err(e) = self.local.put(&config, "").await {
                        warn!("Failed to mirror admin config locally: {}", e);
                    }
                    return LoadedConfig {
                        config,
                        origin: ConfigOrigin::Server,
                        server_error: None,
                    };
                }
                Ok(None) => debug!("Server has no admin config, trying local copy"),
                Err(e) => {
                    warn!("Admin config server read failed: {}", e);
                    server_error = Some(e.to_string());
                }
            }
        }

        match self.local.get(&request).await {
            Ok(Some(config)) => {
                return LoadedConfig {
                    config,
                    origin: ConfigOrigin::Local,
                    server_error,
                }
            }
            Ok(None) => debug!("No local admin config, using defaults"),
            Err(e) => warn!("Local admin config read failed: {}", e),
        }

        let config = match self.defaults.get(&request).await {
            Ok(Some(config)) => config,
            _ => AdminConfig::default(),
        };
        LoadedConfig {
            config,
            origin: ConfigOrigin::Default,
            server_error,
        }
    }

    /// Writes to the server, mirrors locally whatever the server said,
    /// broadcasts, then reports the server's verdict.
    pub async fn save(&self, config: &AdminConfig, admin: &str) -> Result<(), ConfigError> {
        config.validate()?;

        let server_result = match &self.server {
            Some(server) => server.put(config, admin).await,
            None => Ok(()),
        };
        if let Err(e) = &server_result {
            warn!("Admin config server write failed: {}", e);
        }

        if let Err(e) = self.local.put(config, admin).await {
            warn!("Failed to mirror admin config locally: {}", e);
        }
        self.publish(config);

        if server_result.is_ok() {
            info!("Admin config saved by {}", admin);
        }
        server_result
    }

    /// Replaces only the local mirror.
    pub async fn save_local(&self, config: &AdminConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.local.put(config, "").await?;
        self.publish(config);
        Ok(())
    }

    pub async fn clear_local(&self) -> Result<(), ConfigError> {
        self.local.remove().await
    }

    fn publish(&self, config: &AdminConfig) {
        if self.changes.send(config.clone()).is_err() {
            debug!("No subscribers for admin config changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADMIN: &str = "0x742d35cc6634c0532925a3b8d4c9db1c4c5c5c5c";

    enum ServerMode {
        Returns(AdminConfig),
        Empty,
        Forbidden,
    }

    struct MockServer {
        mode: ServerMode,
        puts: AtomicUsize,
    }

    impl MockServer {
        fn new(mode: ServerMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                puts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConfigRepository for MockServer {
        fn name(&self) -> &str {
            "mock"
        }

        async fn get(&self, _request: &ConfigRequest) -> Result<Option<AdminConfig>, ConfigError> {
            match &self.mode {
                ServerMode::Returns(config) => Ok(Some(config.clone())),
                ServerMode::Empty => Ok(None),
                ServerMode::Forbidden => Err(ConfigError::Forbidden),
            }
        }

        async fn put(&self, _config: &AdminConfig, _admin: &str) -> Result<(), ConfigError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                ServerMode::Forbidden => Err(ConfigError::Forbidden),
                _ => Ok(()),
            }
        }
    }

    fn custom_config(minutes: u32) -> AdminConfig {
        AdminConfig {
            update_interval_minutes: minutes,
            ..AdminConfig::default()
        }
    }

    fn store_with(server: Option<Arc<MockServer>>) -> AdminConfigStore {
        let server = server.map(|s| {
            let repository: Arc<dyn ConfigRepository> = s;
            repository
        });
        AdminConfigStore::new(server, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_load_prefers_server_and_mirrors_it() {
        let store = store_with(Some(MockServer::new(ServerMode::Returns(custom_config(7)))));

        let loaded = store.load(Some(ADMIN), true).await;
        assert_eq!(loaded.origin, ConfigOrigin::Server);
        assert_eq!(loaded.config.update_interval_minutes, 7);

        let mirrored = store.local.get(&ConfigRequest::public()).await.unwrap().unwrap();
        assert_eq!(mirrored.update_interval_minutes, 7);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_local_then_defaults() {
        let store = store_with(Some(MockServer::new(ServerMode::Forbidden)));

        let loaded = store.load(Some(ADMIN), true).await;
        assert_eq!(loaded.origin, ConfigOrigin::Default);
        assert_eq!(loaded.config, AdminConfig::default());
        assert!(loaded.server_error.unwrap().contains("Forbidden"));

        store.save_local(&custom_config(9)).await.unwrap();
        let loaded = store.load(None, false).await;
        assert_eq!(loaded.origin, ConfigOrigin::Local);
        assert_eq!(loaded.config.update_interval_minutes, 9);

        store.clear_local().await.unwrap();
        assert_eq!(store.load(None, false).await.origin, ConfigOrigin::Default);
    }

    #[tokio::test]
    async fn test_empty_server_uses_local_copy() {
        let store = store_with(Some(MockServer::new(ServerMode::Empty)));
        store.save_local(&custom_config(3)).await.unwrap();

        let loaded = store.load(None, false).await;
        assert_eq!(loaded.origin, ConfigOrigin::Local);
        assert!(loaded.server_error.is_none());
    }

    #[tokio::test]
    async fn test_save_mirrors_and_broadcasts_even_when_forbidden() {
        let server = MockServer::new(ServerMode::Forbidden);
        let store = store_with(Some(server.clone()));
        let mut changes = store.subscribe();

        let result = store.save(&custom_config(12), ADMIN).await;
        assert!(matches!(result, Err(ConfigError::Forbidden)));
        assert_eq!(server.puts.load(Ordering::SeqCst), 1);

        let local = store.load(None, false).await;
        assert_eq!(local.origin, ConfigOrigin::Local);
        assert_eq!(local.config.update_interval_minutes, 12);
        assert_eq!(changes.recv().await.unwrap().update_interval_minutes, 12);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_config() {
        let server = MockServer::new(ServerMode::Empty);
        let store = store_with(Some(server.clone()));

        let result = store.save(&custom_config(0), ADMIN).await;
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert_eq!(server.puts.load(Ordering::SeqCst), 0);
        assert_eq!(store.load(None, false).await.origin, ConfigOrigin::Default);
    }

    #[tokio::test]
    async fn test_defaults_are_read_only() {
        let repository = DefaultConfigRepository;
        assert_eq!(
            repository.get(&ConfigRequest::public()).await.unwrap(),
            Some(AdminConfig::default())
        );
        assert!(repository.put(&AdminConfig::default(), ADMIN).await.is_err());
    }
}
