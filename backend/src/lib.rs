pub mod admin_config;
pub mod api;
pub mod cache;
pub mod chains;
pub mod config;
pub mod connection;
pub mod database;
pub mod storage;
pub mod token_registry;
pub mod types;
