use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{AdminConfig, ConfigError, ConfigRepository, ConfigRequest};
use crate::types::normalize_address;

pub const ADMIN_HEADER: &str = "X-Admin-Address";
pub const USER_HEADER: &str = "X-User-Address";

#[derive(Debug, Deserialize)]
struct AdminList {
    admins: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the admin-config HTTP API.
#[derive(Clone)]
pub struct RemoteConfigRepository {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteConfigRepository {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ConfigError> {
        Ok(request.timeout(self.timeout).send().await?)
    }

    pub async fn get_admins(&self, caller: &str) -> Result<Vec<String>, ConfigError> {
        let response = self
            .send(self.client.get(self.url("/admins")).header(ADMIN_HEADER, caller))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<AdminList>().await?.admins),
            _ => Err(error_from(response).await),
        }
    }

    pub async fn add_admin(&self, caller: &str, address: &str) -> Result<(), ConfigError> {
        let response = self
            .send(
                self.client
                    .post(self.url("/admins"))
                    .header(ADMIN_HEADER, caller)
                    .query(&[("address", address)]),
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                info!("Added admin {}", normalize_address(address));
                Ok(())
            }
            _ => Err(error_from(response).await),
        }
    }

    /// Refuses to let the caller remove themselves. The server does not
    /// check this, so it only protects callers going through this client.
    pub async fn remove_admin(&self, caller: &str, address: &str) -> Result<(), ConfigError> {
        if normalize_address(caller) == normalize_address(address) {
            return Err(ConfigError::SelfRemoval);
        }

        let response = self
            .send(
                self.client
                    .delete(self.url("/admins"))
                    .header(ADMIN_HEADER, caller)
                    .query(&[("address", address)]),
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                info!("Removed admin {}", normalize_address(address));
                Ok(())
            }
            _ => Err(error_from(response).await),
        }
    }
}

async fn error_from(response: Response) -> ConfigError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ConfigError::Forbidden,
        StatusCode::NOT_FOUND => ConfigError::NotFound,
        StatusCode::CONFLICT => ConfigError::Conflict,
        StatusCode::BAD_REQUEST => {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            ConfigError::Invalid(message)
        }
        _ => ConfigError::Unexpected {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl ConfigRepository for RemoteConfigRepository {
    fn name(&self) -> &str {
        "server"
    }

    async fn get(&self, request: &ConfigRequest) -> Result<Option<AdminConfig>, ConfigError> {
        let builder = match (&request.caller, request.admin_context) {
            (Some(caller), true) => self.client.get(self.url("/config")).header(ADMIN_HEADER, caller),
            (caller, _) => {
                let builder = self.client.get(self.url("/config/readonly"));
                match caller {
                    Some(user) => builder.header(USER_HEADER, user),
                    None => builder,
                }
            }
        };

        let response = self.send(builder).await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => {
                debug!("No admin config stored on server");
                Ok(None)
            }
            _ => Err(error_from(response).await),
        }
    }

    async fn put(&self, config: &AdminConfig, admin: &str) -> Result<(), ConfigError> {
        let response = self
            .send(
                self.client
                    .post(self.url("/config"))
                    .header(ADMIN_HEADER, admin)
                    .json(config),
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(error_from(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_self_removal_is_refused_before_any_request() {
        // Nothing listens on this port; reaching the network would fail differently.
        let repository = RemoteConfigRepository::new(Client::new(), "http://127.0.0.1:9/", Duration::from_millis(200));
        assert_eq!(repository.base_url(), "http://127.0.0.1:9");

        let result = repository
            .remove_admin(
                "0x742d35Cc6634C0532925a3b8D4C9db1C4C5C5C5C",
                "0x742d35cc6634c0532925a3b8d4c9db1c4c5c5c5c",
            )
            .await;
        assert!(matches!(result, Err(ConfigError::SelfRemoval)));
    }
}
