//! Document entity and its processing lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Document processing status
///
/// Moves forward only: `pending -> processing -> {completed | failed}`.
/// A pending document may also fail directly when it is rejected before
/// processing starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Check whether moving to `next` is a forward step
    pub fn can_advance_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// Typed document metadata with an open extension map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Document type (pdf, markdown, note, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    /// Ordered tags
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    /// Anything else the caller attached
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    /// Flatten into a JSON object for storage next to chunk vectors
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Where a document came from (provenance only, never re-fetched)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    #[serde(rename = "type", default)]
    pub source_type: String,

    #[serde(default)]
    pub path: String,
}

/// Processing block recorded on a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProcessing {
    pub status: ProcessingStatus,

    #[serde(default)]
    pub chunk_count: usize,

    #[serde(default)]
    pub relationship_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentProcessing {
    /// Move the status forward, rejecting regressions
    pub fn advance(&mut self, next: ProcessingStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A submitted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-assigned id; generated when empty
    #[serde(default)]
    pub id: String,

    pub content: String,

    #[serde(default)]
    pub metadata: DocumentMetadata,

    #[serde(default)]
    pub source: DocumentSource,

    #[serde(default)]
    pub processing: DocumentProcessing,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: DocumentMetadata::default(),
            source: DocumentSource::default(),
            processing: DocumentProcessing::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// SHA-256 of the content, hex encoded
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Assign a fresh id when the caller left it blank
    pub fn ensure_id(&mut self) -> &str {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        &self.id
    }
}
