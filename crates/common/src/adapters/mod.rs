//! Storage adapter contracts
//!
//! The engine talks to its vector index and relationship graph only through
//! these traits:
//! - [`VectorStore`]: chunk vectors keyed by `(document_id, ordinal)`
//! - [`GraphStore`]: relationships keyed by provenance document
//!
//! Every operation takes a [`CancellationToken`]; implementations should stop
//! early when it fires. [`with_cancellation`] lets callers drop an in-flight
//! call regardless of whether the implementation checks the token.

pub mod memory;

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, Result};
use crate::models::{EmbeddedChunk, GraphStats, Relationship, VectorSearchResult};

pub use memory::{InMemoryGraphStore, InMemoryVectorStore};

/// Similarity index over chunk embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store chunk vectors for a document, returning how many were stored
    async fn store_embeddings(
        &self,
        document_id: &str,
        chunks: &[EmbeddedChunk],
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// Nearest chunks to the query embedding with `score >= threshold`
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Remove all chunk vectors of a document, returning how many were removed
    async fn delete_embeddings(&self, document_id: &str, cancel: &CancellationToken) -> Result<usize>;

    /// Total stored chunk vectors
    async fn count(&self, cancel: &CancellationToken) -> Result<u64>;

    /// Liveness probe
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Property graph of extracted relationships
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert relationships extracted from a document
    async fn upsert_relationships(
        &self,
        document_id: &str,
        relationships: &[Relationship],
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// Remove every relationship extracted from a document
    async fn delete_relationships(&self, document_id: &str, cancel: &CancellationToken) -> Result<usize>;

    /// Relationships whose source or target is one of the entity ids
    async fn query(&self, entity_ids: &[String], cancel: &CancellationToken) -> Result<Vec<Relationship>>;

    /// Relationships extracted from any of the documents
    async fn document_relationships(
        &self,
        document_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Relationship>>;

    /// Node and relationship counters
    async fn stats(&self, cancel: &CancellationToken) -> Result<GraphStats>;

    /// Liveness probe
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Run an adapter call, dropping it as soon as the token fires
pub async fn with_cancellation<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(AppError::cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::cancelled(operation)),
        result = call => result,
    }
}
