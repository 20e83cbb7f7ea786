//! Configuration management for the memory context engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Engine budgets and concurrency limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Health check cache configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// LLM adapter configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum documents ingested concurrently
    #[serde(default = "default_ingestion_workers")]
    pub ingestion_workers: usize,

    /// Chunk size (characters) used when a request does not supply one
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Vector candidates requested per surfaced document
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,

    /// Maximum relationships attached to a context response
    #[serde(default = "default_relationship_budget")]
    pub relationship_budget: usize,

    /// Documents surfaced when a request does not say
    #[serde(default = "default_max_documents")]
    pub default_max_documents: usize,

    /// Score floor when a request does not say
    #[serde(default = "default_min_score")]
    pub default_min_score: f32,

    /// Buffered events per analysis session
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// How long a probe result stays fresh
    #[serde(default = "default_health_ttl")]
    pub ttl_secs: u64,

    /// Upper bound for a single probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai (any OpenAI-compatible endpoint) or mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chat model used for summaries, extraction and analysis
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_ingestion_workers() -> usize { 4 }
fn default_chunk_size() -> usize { 1000 }
fn default_over_fetch_factor() -> usize { 3 }
fn default_relationship_budget() -> usize { 20 }
fn default_max_documents() -> usize { 5 }
fn default_min_score() -> f32 { 0.3 }
fn default_session_buffer() -> usize { 32 }
fn default_health_ttl() -> u64 { 30 }
fn default_probe_timeout() -> u64 { 2000 }
fn default_llm_provider() -> String { "mock".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "memctx".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingestion_workers: default_ingestion_workers(),
            default_chunk_size: default_chunk_size(),
            over_fetch_factor: default_over_fetch_factor(),
            relationship_budget: default_relationship_budget(),
            default_max_documents: default_max_documents(),
            default_min_score: default_min_score(),
            session_buffer: default_session_buffer(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_health_ttl(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            embedding_model: default_embedding_model(),
            chat_model: default_chat_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl HealthConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__ENGINE__INGESTION_WORKERS=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, message: &str| AppError::Configuration {
            message: format!("{}: {}", field, message),
        };

        if self.engine.ingestion_workers == 0 {
            return Err(invalid("engine.ingestion_workers", "must be at least 1"));
        }
        if self.engine.default_chunk_size == 0 {
            return Err(invalid("engine.default_chunk_size", "must be at least 1"));
        }
        if self.engine.over_fetch_factor == 0 {
            return Err(invalid("engine.over_fetch_factor", "must be at least 1"));
        }
        if self.engine.session_buffer == 0 {
            return Err(invalid("engine.session_buffer", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.engine.default_min_score) {
            return Err(invalid("engine.default_min_score", "must be within [0, 1]"));
        }
        if self.health.ttl_secs == 0 {
            return Err(invalid("health.ttl_secs", "must be at least 1"));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(invalid("health.probe_timeout_ms", "must be at least 1"));
        }
        if self.llm.max_retries == 0 {
            return Err(invalid("llm.max_retries", "must be at least 1"));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            health: HealthConfig::default(),
            llm: LlmConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.over_fetch_factor, 3);
        assert_eq!(config.llm.provider, "mock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.engine.ingestion_workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ingestion_workers"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = AppConfig::default();
        config.llm.max_retries = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("llm.max_retries"));
    }

    #[test]
    fn test_health_durations() {
        let health = HealthConfig { ttl_secs: 5, probe_timeout_ms: 250 };
        assert_eq!(health.ttl(), Duration::from_secs(5));
        assert_eq!(health.probe_timeout(), Duration::from_millis(250));
    }
}
