//! Document ingestion pipeline
//!
//! Turns submitted documents into stored chunk vectors, graph relationships
//! and summaries:
//! - Validation (non-empty content, unique ids within the batch)
//! - Chunking, then embedding, relationship extraction and summary concurrently
//! - Vector and relationship replacement keyed by document id
//!
//! Documents are processed with bounded concurrency. A failure is scoped to
//! its document and removes its stored chunks and relationships; the batch
//! call itself only fails on invalid options.

use futures::stream::{self, StreamExt};
use memctx_common::{
    adapters::{with_cancellation, GraphStore, VectorStore},
    config::EngineConfig,
    errors::{AdapterKind, AppError, Result},
    llm::LlmClient,
    metrics::record_ingestion,
    models::{Document, EmbeddedChunk, ProcessingStatus, Relationship},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::chunker::chunk_text;

/// Ingestion options
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOptions {
    /// Generate a summary per document
    #[serde(default = "default_true")]
    pub auto_summarize: bool,

    /// Extract relationships into the graph store
    #[serde(default = "default_true")]
    pub extract_relationships: bool,

    /// Chunk size in chars (engine default when unset)
    #[serde(default)]
    #[validate(range(min = 1, max = 1_000_000))]
    pub chunk_size: Option<usize>,
}

fn default_true() -> bool { true }

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            auto_summarize: true,
            extract_relationships: true,
            chunk_size: None,
        }
    }
}

/// Outcome for one submitted document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerDocumentResult {
    pub document_id: String,
    pub status: ProcessingStatus,
    pub chunks_created: usize,
    pub relationships_extracted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    /// The document with its final processing block
    pub document: Document,
}

/// Result of a batch ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub results: Vec<PerDocumentResult>,
    pub total_processing_time_ms: u64,
}

impl IngestionResult {
    /// Result for a document id, if it was part of the batch
    pub fn result_for(&self, document_id: &str) -> Option<&PerDocumentResult> {
        self.results.iter().find(|r| r.document_id == document_id)
    }
}

/// What a successfully processed document produced
struct StepOutcome {
    chunks: usize,
    relationships: usize,
    summary: Option<String>,
}

/// Ingestion pipeline over shared adapters
pub struct IngestionPipeline {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
}

impl IngestionPipeline {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
        config: EngineConfig,
    ) -> Self {
        Self { vector, graph, llm, config }
    }

    /// Ingest a batch of documents
    #[instrument(skip(self, documents, options, cancel), fields(batch_size = documents.len()))]
    pub async fn ingest(
        &self,
        documents: Vec<Document>,
        options: &IngestionOptions,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult> {
        options.validate()?;
        let chunk_size = options.chunk_size.unwrap_or(self.config.default_chunk_size);
        if chunk_size == 0 {
            return Err(AppError::invalid_field("chunkSize", "chunk size must be at least 1"));
        }

        let start = Instant::now();
        let prepared = prepare_batch(documents);

        let results: Vec<PerDocumentResult> = stream::iter(prepared)
            .map(|(document, rejection)| self.process(document, rejection, chunk_size, options, cancel))
            .buffer_unordered(self.config.ingestion_workers.max(1))
            .collect()
            .await;

        let successful_documents = results
            .iter()
            .filter(|r| r.status == ProcessingStatus::Completed)
            .count();
        let failed_documents = results.len() - successful_documents;

        info!(
            successful = successful_documents,
            failed = failed_documents,
            "Ingestion batch finished"
        );

        Ok(IngestionResult {
            successful_documents,
            failed_documents,
            results,
            total_processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn process(
        &self,
        mut document: Document,
        rejection: Option<String>,
        chunk_size: usize,
        options: &IngestionOptions,
        cancel: &CancellationToken,
    ) -> PerDocumentResult {
        let start = Instant::now();

        if let Some(reason) = rejection {
            let error = AppError::invalid_field("document", reason);
            warn!(document_id = %document.id, error = %error, "Document rejected");
            record_ingestion(start.elapsed().as_secs_f64(), 0, "failed");
            return failed(document, error.to_string(), start.elapsed().as_millis() as u64);
        }

        let outcome = match document.processing.advance(ProcessingStatus::Processing) {
            Ok(()) => {
                with_cancellation(
                    cancel,
                    "ingest document",
                    self.run_steps(&document, chunk_size, options, cancel),
                )
                .await
            }
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.purge(&document.id).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(step) => {
                let processing = &mut document.processing;
                processing.chunk_count = step.chunks;
                processing.relationship_count = step.relationships;
                processing.summary = step.summary.clone();
                processing.error = None;
                if let Err(e) = processing.advance(ProcessingStatus::Completed) {
                    self.purge(&document.id).await;
                    return failed(document, e.to_string(), elapsed_ms);
                }

                info!(
                    document_id = %document.id,
                    chunks = step.chunks,
                    relationships = step.relationships,
                    elapsed_ms = elapsed_ms,
                    "Document ingested"
                );
                record_ingestion(elapsed_ms as f64 / 1000.0, step.chunks, "completed");

                PerDocumentResult {
                    document_id: document.id.clone(),
                    status: ProcessingStatus::Completed,
                    chunks_created: step.chunks,
                    relationships_extracted: step.relationships,
                    summary: step.summary,
                    error: None,
                    processing_time_ms: elapsed_ms,
                    document,
                }
            }
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "Document ingestion failed");
                record_ingestion(elapsed_ms as f64 / 1000.0, 0, "failed");
                failed(document, e.to_string(), elapsed_ms)
            }
        }
    }

    async fn run_steps(
        &self,
        document: &Document,
        chunk_size: usize,
        options: &IngestionOptions,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let chunks = chunk_text(&document.content, chunk_size)?;
        if chunks.is_empty() {
            return Err(AppError::invalid_field("content", "document produced no chunks"));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let (embeddings, extracted, summary) = tokio::try_join!(
            self.llm.embed_batch(&texts, cancel),
            self.extract(document, options.extract_relationships, cancel),
            self.summarize(document, options.auto_summarize, cancel),
        )?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::adapter(
                AdapterKind::Llm,
                format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            ));
        }

        let mut base_metadata = document.metadata.to_value();
        if let Some(fields) = base_metadata.as_object_mut() {
            fields.insert("content_hash".into(), document.content_hash().into());
        }
        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut metadata = base_metadata.clone();
                if let Some(fields) = metadata.as_object_mut() {
                    fields.insert("start".into(), chunk.start.into());
                    fields.insert("end".into(), chunk.end.into());
                }
                EmbeddedChunk {
                    document_id: document.id.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.content,
                    embedding,
                    metadata,
                }
            })
            .collect();

        // Stores are only touched once every model call has succeeded
        self.vector.delete_embeddings(&document.id, cancel).await?;
        let stored = self.vector.store_embeddings(&document.id, &embedded, cancel).await?;

        self.graph.delete_relationships(&document.id, cancel).await?;
        let relationships = if extracted.is_empty() {
            0
        } else {
            self.graph.upsert_relationships(&document.id, &extracted, cancel).await?
        };

        Ok(StepOutcome { chunks: stored, relationships, summary })
    }

    /// Remove whatever a failed attempt left in the stores
    async fn purge(&self, document_id: &str) {
        // The caller's token may already have fired
        let cleanup = CancellationToken::new();
        let (vectors, relationships) = tokio::join!(
            self.vector.delete_embeddings(document_id, &cleanup),
            self.graph.delete_relationships(document_id, &cleanup),
        );
        if let Err(e) = vectors.and(relationships) {
            warn!(document_id = %document_id, error = %e, "Failed to purge document after failure");
        }
    }

    /// Relationships extracted from the document, stamped with provenance
    async fn extract(
        &self,
        document: &Document,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Relationship>> {
        if !enabled {
            return Ok(Vec::new());
        }

        let extracted = self.llm.extract_relationships(&document.content, cancel).await?;
        Ok(extracted
            .into_iter()
            .map(|r| r.for_document(&document.id))
            .collect())
    }

    async fn summarize(
        &self,
        document: &Document,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if !enabled {
            return Ok(None);
        }
        self.llm.summarize(&document.content, cancel).await.map(Some)
    }
}

/// Assign ids and flag documents that fail batch-level validation
fn prepare_batch(documents: Vec<Document>) -> Vec<(Document, Option<String>)> {
    let mut seen = HashSet::new();

    documents
        .into_iter()
        .map(|mut document| {
            let id = document.ensure_id().to_string();
            let rejection = if document.content.trim().is_empty() {
                Some("document content is empty".to_string())
            } else if !seen.insert(id.clone()) {
                Some(format!("duplicate document id '{}' in batch", id))
            } else {
                None
            };
            (document, rejection)
        })
        .collect()
}

fn failed(mut document: Document, error: String, elapsed_ms: u64) -> PerDocumentResult {
    let processing = &mut document.processing;
    // Pending and processing documents can both fail
    let _ = processing.advance(ProcessingStatus::Failed);
    processing.error = Some(error.clone());

    PerDocumentResult {
        document_id: document.id.clone(),
        status: document.processing.status,
        chunks_created: 0,
        relationships_extracted: 0,
        summary: None,
        error: Some(error),
        processing_time_ms: elapsed_ms,
        document,
    }
}
