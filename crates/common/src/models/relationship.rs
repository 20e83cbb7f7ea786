//! Graph relationships extracted from documents

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A directed, typed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source entity identifier
    pub source: String,

    /// Target entity identifier
    pub target: String,

    /// Verb-like label (e.g. "depends_on")
    #[serde(rename = "type")]
    pub relationship_type: String,

    /// Extraction confidence (0.0 - 1.0)
    pub confidence: f32,

    /// Document the relationship was extracted from
    #[serde(default)]
    pub document_id: String,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        relationship_type: impl Into<String>,
        target: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship_type: relationship_type.into(),
            confidence: clamp_confidence(confidence),
            document_id: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Stamp provenance and clamp confidence into range
    pub fn for_document(mut self, document_id: &str) -> Self {
        self.document_id = document_id.to_string();
        self.confidence = clamp_confidence(self.confidence);
        self
    }

    /// Check whether either endpoint matches the entity (case-insensitive)
    pub fn touches(&self, entity: &str) -> bool {
        self.source.eq_ignore_ascii_case(entity) || self.target.eq_ignore_ascii_case(entity)
    }

    /// Ranking order: confidence descending, then source, target, type
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .confidence
            .partial_cmp(&self.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| self.relationship_type.cmp(&other.relationship_type))
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Graph size counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub relationship_count: u64,
}
