//! Language model abstraction
//!
//! Provides a unified interface for the model operations the engine needs:
//! - Embeddings for chunks and queries
//! - Relationship extraction and summaries
//! - Incremental (streamed) chat for analysis sessions
//!
//! Retries and request timeouts belong to the implementation; the engine calls
//! each operation once and treats an error as final.

mod mock;
mod openai;

pub use mock::{MockLlm, MockOperation};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::models::Relationship;

/// Finite, single-pass sequence of text increments
pub type TextStream = BoxStream<'static, Result<String>>;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// Trait for language model operations
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, cancel).await?);
        }
        Ok(embeddings)
    }

    /// Extract relationship triples from a text
    async fn extract_relationships(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Relationship>>;

    /// Produce a short summary of a text
    async fn summarize(&self, text: &str, cancel: &CancellationToken) -> Result<String>;

    /// Start an incremental chat completion
    async fn stream_chat(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<TextStream>;

    /// Liveness probe
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;

    /// Models the provider can serve
    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Get the embedding model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Create an LLM client based on configuration
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(config)?)),
        "mock" => Ok(Arc::new(MockLlm::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown llm provider '{}'", other),
        }),
    }
}
