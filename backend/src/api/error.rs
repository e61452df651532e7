use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

use crate::admin_config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!("Request failed: {:#}", e);
        }
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Forbidden => ApiError::Forbidden(err.to_string()),
            ConfigError::NotFound => ApiError::NotFound(err.to_string()),
            ConfigError::Conflict => ApiError::Conflict(err.to_string()),
            ConfigError::Invalid(message) => ApiError::BadRequest(message),
            ConfigError::SelfRemoval => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(ConfigError::Forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(ConfigError::Conflict).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ConfigError::Invalid("bad".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        let unexpected = ConfigError::Unexpected {
            status: 502,
            body: String::new(),
        };
        assert_eq!(ApiError::from(unexpected).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
