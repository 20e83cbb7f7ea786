//! In-memory adapter implementations for tests and offline runs.
//!
//! Vectors live in a `HashMap` keyed by document id behind a tokio `RwLock`;
//! search is brute-force cosine similarity clamped into `[0, 1]`.
//! Relationships are a flat list; entity matching ignores ASCII case.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{GraphStore, VectorStore};
use crate::errors::{AdapterKind, AppError, Result};
use crate::models::{EmbeddedChunk, GraphStats, Relationship, VectorSearchResult};

#[derive(Debug, Clone)]
struct StoredVector {
    ordinal: usize,
    text: String,
    embedding: Vec<f32>,
    metadata: serde_json::Value,
}

/// Brute-force vector index
#[derive(Default)]
pub struct InMemoryVectorStore {
    documents: RwLock<HashMap<String, Vec<StoredVector>>>,
    dimension: RwLock<Option<usize>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts stored for a document, ordered by ordinal
    pub async fn chunk_texts(&self, document_id: &str) -> Vec<String> {
        let documents = self.documents.read().await;
        let mut stored: Vec<&StoredVector> = documents
            .get(document_id)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        stored.sort_by_key(|s| s.ordinal);
        stored.into_iter().map(|s| s.text.clone()).collect()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
    }
}

fn check_cancel(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::cancelled(operation));
    }
    Ok(())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn store_embeddings(
        &self,
        document_id: &str,
        chunks: &[EmbeddedChunk],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        check_cancel(cancel, "store embeddings")?;

        {
            let mut dimension = self.dimension.write().await;
            for chunk in chunks {
                match *dimension {
                    Some(dim) if dim != chunk.embedding.len() => {
                        return Err(AppError::adapter(
                            AdapterKind::VectorStore,
                            format!(
                                "embedding dimension {} does not match index dimension {}",
                                chunk.embedding.len(),
                                dim
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => *dimension = Some(chunk.embedding.len()),
                }
            }
        }

        let mut documents = self.documents.write().await;
        let stored = documents.entry(document_id.to_string()).or_default();
        for chunk in chunks {
            let entry = StoredVector {
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                embedding: chunk.embedding.clone(),
                metadata: chunk.metadata.clone(),
            };
            match stored.iter_mut().find(|s| s.ordinal == chunk.ordinal) {
                Some(existing) => *existing = entry,
                None => stored.push(entry),
            }
        }

        Ok(chunks.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<VectorSearchResult>> {
        check_cancel(cancel, "vector search")?;

        let documents = self.documents.read().await;
        let mut hits: Vec<VectorSearchResult> = documents
            .iter()
            .flat_map(|(document_id, stored)| {
                stored.iter().map(move |s| VectorSearchResult {
                    document_id: document_id.clone(),
                    ordinal: s.ordinal,
                    content: s.text.clone(),
                    score: cosine_sim(query_embedding, &s.embedding),
                    metadata: s.metadata.clone(),
                })
            })
            .filter(|hit| hit.score >= threshold)
            .collect();

        hits.sort_by(|a, b| a.rank_cmp(b));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_embeddings(&self, document_id: &str, cancel: &CancellationToken) -> Result<usize> {
        check_cancel(cancel, "delete embeddings")?;
        let mut documents = self.documents.write().await;
        Ok(documents.remove(document_id).map(|v| v.len()).unwrap_or(0))
    }

    async fn count(&self, cancel: &CancellationToken) -> Result<u64> {
        check_cancel(cancel, "count embeddings")?;
        let documents = self.documents.read().await;
        Ok(documents.values().map(|v| v.len() as u64).sum())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        check_cancel(cancel, "vector store health")
    }
}

/// Flat relationship list with provenance
#[derive(Default)]
pub struct InMemoryGraphStore {
    relationships: RwLock<Vec<Relationship>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relationships extracted from one document
    pub async fn relationships_for(&self, document_id: &str) -> Vec<Relationship> {
        self.relationships
            .read()
            .await
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_relationships(
        &self,
        document_id: &str,
        relationships: &[Relationship],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        check_cancel(cancel, "upsert relationships")?;
        let mut stored = self.relationships.write().await;
        stored.extend(relationships.iter().cloned().map(|r| r.for_document(document_id)));
        Ok(relationships.len())
    }

    async fn delete_relationships(&self, document_id: &str, cancel: &CancellationToken) -> Result<usize> {
        check_cancel(cancel, "delete relationships")?;
        let mut stored = self.relationships.write().await;
        let before = stored.len();
        stored.retain(|r| r.document_id != document_id);
        Ok(before - stored.len())
    }

    async fn query(&self, entity_ids: &[String], cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        check_cancel(cancel, "graph query")?;
        let stored = self.relationships.read().await;
        Ok(stored
            .iter()
            .filter(|r| entity_ids.iter().any(|e| r.touches(e)))
            .cloned()
            .collect())
    }

    async fn document_relationships(
        &self,
        document_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Relationship>> {
        check_cancel(cancel, "document relationships")?;
        let stored = self.relationships.read().await;
        Ok(stored
            .iter()
            .filter(|r| document_ids.iter().any(|id| *id == r.document_id))
            .cloned()
            .collect())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<GraphStats> {
        check_cancel(cancel, "graph stats")?;
        let stored = self.relationships.read().await;
        let nodes: HashSet<String> = stored
            .iter()
            .flat_map(|r| [r.source.to_lowercase(), r.target.to_lowercase()])
            .collect();

        Ok(GraphStats {
            node_count: nodes.len() as u64,
            relationship_count: stored.len() as u64,
        })
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        check_cancel(cancel, "graph store health")
    }
}
