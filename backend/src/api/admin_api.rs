use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ApiError;
use crate::admin_config::remote::{ADMIN_HEADER, USER_HEADER};
use crate::admin_config::AdminConfig;
use crate::database::AdminRepository;
use crate::types::{is_valid_address, normalize_address};

#[derive(Clone)]
pub struct AdminApiState {
    pub repository: Arc<dyn AdminRepository>,
}

impl AdminApiState {
    pub fn new(repository: Arc<dyn AdminRepository>) -> Self {
        Self { repository }
    }

    /// Resolves the `X-Admin-Address` header to a listed admin.
    async fn require_admin(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        let caller = headers
            .get(ADMIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(normalize_address)
            .filter(|address| is_valid_address(address))
            .ok_or_else(|| ApiError::Forbidden(format!("Missing or invalid {} header", ADMIN_HEADER)))?;

        if !self.repository.is_admin(&caller).await? {
            warn!("Rejected admin request from {}", caller);
            return Err(ApiError::Forbidden("Address is not an admin".to_string()));
        }
        Ok(caller)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddressParams {
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminListResponse {
    pub admins: Vec<String>,
}

pub fn create_admin_router() -> Router<AdminApiState> {
    Router::new()
        .route("/config", get(get_config).post(save_config))
        .route("/config/readonly", get(get_readonly_config))
        .route("/admins", get(list_admins).post(add_admin).delete(remove_admin))
        .route("/health", get(health_check))
}

fn target_address(params: AddressParams) -> Result<String, ApiError> {
    let address = params
        .address
        .map(|a| normalize_address(&a))
        .ok_or_else(|| ApiError::BadRequest("Missing address parameter".to_string()))?;
    if !is_valid_address(&address) {
        return Err(ApiError::BadRequest(format!("Invalid address: {}", address)));
    }
    Ok(address)
}

/// GET /config
async fn get_config(State(state): State<AdminApiState>, headers: HeaderMap) -> Result<Json<AdminConfig>, ApiError> {
    let caller = state.require_admin(&headers).await?;
    match state.repository.get_config(&caller).await? {
        Some(config) => Ok(Json(config)),
        None => Err(ApiError::NotFound(format!("No config stored for {}", caller))),
    }
}

/// GET /config/readonly
async fn get_readonly_config(
    State(state): State<AdminApiState>,
    headers: HeaderMap,
) -> Result<Json<AdminConfig>, ApiError> {
    if let Some(user) = headers.get(USER_HEADER).and_then(|v| v.to_str().ok()) {
        info!("Read-only config requested by {}", normalize_address(user));
    }
    let config = state.repository.latest_config().await?.unwrap_or_default();
    Ok(Json(config))
}

/// POST /config
async fn save_config(
    State(state): State<AdminApiState>,
    headers: HeaderMap,
    body: Result<Json<AdminConfig>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let caller = state.require_admin(&headers).await?;
    let Json(config) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    config.validate()?;

    state.repository.upsert_config(&caller, &config).await?;
    info!("Admin config updated by {}", caller);
    Ok(Json(json!({ "success": true, "config": config })))
}

/// GET /admins
async fn list_admins(
    State(state): State<AdminApiState>,
    headers: HeaderMap,
) -> Result<Json<AdminListResponse>, ApiError> {
    state.require_admin(&headers).await?;
    let admins = state
        .repository
        .list_admins()
        .await?
        .into_iter()
        .map(|entry| entry.address)
        .collect();
    Ok(Json(AdminListResponse { admins }))
}

/// POST /admins?address=
async fn add_admin(
    State(state): State<AdminApiState>,
    headers: HeaderMap,
    Query(params): Query<AddressParams>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = state.require_admin(&headers).await?;
    let address = target_address(params)?;

    if !state.repository.add_admin(&address).await? {
        return Err(ApiError::Conflict(format!("{} is already an admin", address)));
    }
    info!("{} added admin {}", caller, address);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "address": address }))))
}

/// DELETE /admins?address=
async fn remove_admin(
    State(state): State<AdminApiState>,
    headers: HeaderMap,
    Query(params): Query<AddressParams>,
) -> Result<Json<Value>, ApiError> {
    let caller = state.require_admin(&headers).await?;
    let address = target_address(params)?;

    if !state.repository.remove_admin(&address).await? {
        return Err(ApiError::NotFound(format!("{} is not an admin", address)));
    }
    info!("{} removed admin {}", caller, address);
    Ok(Json(json!({ "success": true, "address": address })))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "admin_config" }))
}
