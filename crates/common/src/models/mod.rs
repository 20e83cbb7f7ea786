//! Engine data model
//!
//! Documents and their processing lifecycle, extracted relationships,
//! search hits, context payloads and health results.

pub mod context;
pub mod document;
pub mod health;
pub mod relationship;

pub use context::{ContextDocument, ContextPayload, ContextResponse, EmbeddedChunk, VectorSearchResult};
pub use document::{Document, DocumentMetadata, DocumentProcessing, DocumentSource, ProcessingStatus};
pub use health::{HealthCheckCacheStatistics, HealthCheckResult, HealthStatus};
pub use relationship::{GraphStats, Relationship};
