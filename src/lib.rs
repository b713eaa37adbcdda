// Core modules
pub mod account;
pub mod api;
pub mod collector;
pub mod config;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod llm;
pub mod models;
pub mod persistence;
pub mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
