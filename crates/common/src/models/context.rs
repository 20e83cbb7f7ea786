//! Chunk, search-hit and context payload types

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::Relationship;

/// A chunk with its embedding, ready to hand to a vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// Owning document
    pub document_id: String,

    /// 0-based position within the document
    pub ordinal: usize,

    /// Chunk text
    pub text: String,

    /// Embedding vector
    pub embedding: Vec<f32>,

    /// Document metadata plus chunk bookkeeping
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One vector similarity hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub document_id: String,

    /// Ordinal of the matched chunk
    pub ordinal: usize,

    /// Matched chunk text
    pub content: String,

    /// Similarity score (0.0 - 1.0, higher is closer)
    pub score: f32,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl VectorSearchResult {
    /// Ranking order: score descending, then ordinal, then document id
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.ordinal.cmp(&other.ordinal))
            .then_with(|| self.document_id.cmp(&other.document_id))
    }
}

/// A document surfaced in a context response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,

    /// Best-matching chunk text
    pub content: String,

    pub score: f32,

    /// Ordinal of the best-matching chunk
    pub ordinal: usize,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl From<VectorSearchResult> for ContextDocument {
    fn from(hit: VectorSearchResult) -> Self {
        Self {
            id: hit.document_id,
            content: hit.content,
            score: hit.score,
            ordinal: hit.ordinal,
            metadata: hit.metadata,
        }
    }
}

/// Ranked documents, relationships and an optional summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub documents: Vec<ContextDocument>,
    pub relationships: Vec<Relationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Response of a context retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub query: String,
    pub context: ContextPayload,

    /// Candidates that passed filtering, before truncation
    pub total_results: usize,

    pub processing_time_ms: u64,
}

impl ContextResponse {
    /// Check whether documents were cut by the budget
    pub fn is_truncated(&self) -> bool {
        self.total_results > self.context.documents.len()
    }
}
