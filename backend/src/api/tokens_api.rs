use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use crate::chains::{all_chains, is_supported, ChainInfo};
use crate::token_registry::{
    apply_view, total_value_usd, PipelineStatus, RefreshMode, RefreshOutcome, TokenDiscoveryService, TokenEntry,
    TokenViewOptions,
};
use crate::types::{is_valid_address, normalize_address};

#[derive(Clone)]
pub struct TokensApiState {
    pub discovery: Arc<TokenDiscoveryService>,
}

impl TokensApiState {
    pub fn new(discovery: Arc<TokenDiscoveryService>) -> Self {
        Self { discovery }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenViewQuery {
    pub show_zero_balance: Option<bool>,
    pub show_low_value: Option<bool>,
}

impl TokenViewQuery {
    fn options(&self) -> TokenViewOptions {
        let defaults = TokenViewOptions::default();
        TokenViewOptions {
            show_zero_balance: self.show_zero_balance.unwrap_or(defaults.show_zero_balance),
            show_low_value: self.show_low_value.unwrap_or(defaults.show_low_value),
            ..defaults
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListResponse {
    pub account: String,
    pub chain_id: u64,
    pub status: PipelineStatus,
    pub tokens: Vec<TokenEntry>,
    pub total_value_usd: Decimal,
    pub last_updated: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    #[serde(flatten)]
    pub outcome: RefreshOutcome,
    pub snapshot: TokenListResponse,
}

pub fn create_tokens_router() -> Router<TokensApiState> {
    Router::new()
        .route("/tokens/:chain_id/:account", get(get_tokens).delete(unwatch_tokens))
        .route("/tokens/:chain_id/:account/refresh", post(refresh_tokens))
        .route("/chains", get(list_chains))
}

fn validate_pair(chain_id: u64, account: &str) -> Result<String, ApiError> {
    let account = normalize_address(account);
    if !is_valid_address(&account) {
        return Err(ApiError::BadRequest(format!("Invalid account address: {}", account)));
    }
    if !is_supported(chain_id) {
        return Err(ApiError::BadRequest(format!("Unsupported chain: {}", chain_id)));
    }
    Ok(account)
}

fn list_response(
    discovery: &TokenDiscoveryService,
    account: &str,
    chain_id: u64,
    options: &TokenViewOptions,
) -> TokenListResponse {
    let (status, all_tokens, last_updated) = match discovery.snapshot(account, chain_id) {
        Some(snapshot) => (snapshot.status, snapshot.tokens, snapshot.last_updated),
        None => (PipelineStatus::Idle, Vec::new(), None),
    };

    TokenListResponse {
        account: account.to_string(),
        chain_id,
        status,
        total_value_usd: total_value_usd(&all_tokens),
        tokens: apply_view(&all_tokens, options),
        last_updated,
    }
}

/// GET /tokens/:chain_id/:account
async fn get_tokens(
    State(state): State<TokensApiState>,
    Path((chain_id, account)): Path<(u64, String)>,
    Query(query): Query<TokenViewQuery>,
) -> Result<Json<TokenListResponse>, ApiError> {
    let account = validate_pair(chain_id, &account)?;

    if !state.discovery.is_watched(&account, chain_id) {
        let outcome = state.discovery.watch(&account, chain_id).await;
        debug!("Initial load for {} on chain {}: {:?}", account, chain_id, outcome);
    }

    Ok(Json(list_response(&state.discovery, &account, chain_id, &query.options())))
}

/// POST /tokens/:chain_id/:account/refresh
async fn refresh_tokens(
    State(state): State<TokensApiState>,
    Path((chain_id, account)): Path<(u64, String)>,
    Query(query): Query<TokenViewQuery>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let account = validate_pair(chain_id, &account)?;

    let outcome = if state.discovery.is_watched(&account, chain_id) {
        state.discovery.refresh(&account, chain_id, RefreshMode::Foreground).await
    } else {
        state.discovery.watch(&account, chain_id).await
    };

    Ok(Json(RefreshResponse {
        outcome,
        snapshot: list_response(&state.discovery, &account, chain_id, &query.options()),
    }))
}

/// DELETE /tokens/:chain_id/:account
async fn unwatch_tokens(
    State(state): State<TokensApiState>,
    Path((chain_id, account)): Path<(u64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = validate_pair(chain_id, &account)?;
    state.discovery.unwatch(&account, chain_id);
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_chains() -> Json<Vec<&'static ChainInfo>> {
    Json(all_chains())
}
