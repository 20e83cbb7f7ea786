//! Memctx Context Engine
//!
//! Memory context pipeline over vector, graph and language model adapters:
//! - Chunking and document ingestion
//! - Context fusion (vector hits + graph relationships)
//! - Streaming analysis sessions with SSE framing
//! - Cached downstream health checks

pub mod chunker;
pub mod engine;
pub mod fusion;
pub mod health;
pub mod ingestion;
pub mod session;

pub use engine::{DeletedDocument, EngineStats, MemoryContextEngine};
pub use fusion::ContextOptions;
pub use health::HealthCheckCache;
pub use ingestion::{IngestionOptions, IngestionResult, PerDocumentResult};
pub use session::{AnalysisStream, EventKind, SessionEvent, SessionState};
