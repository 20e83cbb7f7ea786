//! Memctx Common Library
//!
//! Shared code for the memory context engine including:
//! - Domain models (documents, relationships, context, health)
//! - Vector store and graph store adapter contracts
//! - Language model client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics

pub mod adapters;
pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use adapters::{GraphStore, VectorStore};
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::LlmClient;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
