pub mod admin_api;
pub mod error;
pub mod tokens_api;

pub use admin_api::{create_admin_router, AdminApiState};
pub use error::{ApiError, ErrorResponse};
pub use tokens_api::{create_tokens_router, TokensApiState};
