//! Engine facade
//!
//! Wires ingestion, fusion, analysis sessions and the health cache over one
//! shared set of adapters. Create it once at startup and call
//! [`MemoryContextEngine::shutdown`] at teardown.

use memctx_common::{
    adapters::{GraphStore, VectorStore},
    config::AppConfig,
    errors::{AppError, Result},
    llm::LlmClient,
    models::{ContextResponse, Document, HealthCheckCacheStatistics, HealthCheckResult},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::fusion::{ContextFusion, ContextOptions};
use crate::health::HealthCheckCache;
use crate::ingestion::{IngestionOptions, IngestionPipeline, IngestionResult};
use crate::session::{AnalysisSessions, AnalysisStream};

/// Health probe names
pub const VECTOR_STORE_SERVICE: &str = "vector_store";
pub const GRAPH_STORE_SERVICE: &str = "graph_store";
pub const LLM_SERVICE: &str = "llm";

/// Counts removed by [`MemoryContextEngine::delete_document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedDocument {
    pub chunks_deleted: usize,
    pub relationships_deleted: usize,
}

/// Stored state counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub chunk_count: u64,
    pub node_count: u64,
    pub relationship_count: u64,
}

/// Memory context engine
pub struct MemoryContextEngine {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmClient>,
    ingestion: IngestionPipeline,
    fusion: Arc<ContextFusion>,
    sessions: AnalysisSessions,
    health: HealthCheckCache,
    config: AppConfig,
}

impl MemoryContextEngine {
    pub fn new(
        config: AppConfig,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let engine_config = config.engine.clone();

        let ingestion = IngestionPipeline::new(
            vector.clone(),
            graph.clone(),
            llm.clone(),
            engine_config.clone(),
        );
        let fusion = Arc::new(ContextFusion::new(
            vector.clone(),
            graph.clone(),
            llm.clone(),
            engine_config.clone(),
        ));
        let sessions = AnalysisSessions::new(fusion.clone(), llm.clone(), engine_config.session_buffer);

        let mut health = HealthCheckCache::new(&config.health);
        {
            let vector = vector.clone();
            health.register(VECTOR_STORE_SERVICE, move |cancel| {
                let vector = vector.clone();
                async move { vector.health_check(&cancel).await }
            });
        }
        {
            let graph = graph.clone();
            health.register(GRAPH_STORE_SERVICE, move |cancel| {
                let graph = graph.clone();
                async move { graph.health_check(&cancel).await }
            });
        }
        {
            let llm = llm.clone();
            health.register(LLM_SERVICE, move |cancel| {
                let llm = llm.clone();
                async move { llm.health_check(&cancel).await }
            });
        }

        info!(
            llm_model = llm.model_name(),
            dimension = llm.dimension(),
            workers = engine_config.ingestion_workers,
            "Memory context engine initialized"
        );

        Self { vector, graph, llm, ingestion, fusion, sessions, health, config }
    }

    /// Context options filled from configured defaults
    pub fn default_context_options(&self) -> ContextOptions {
        ContextOptions::from_config(&self.config.engine)
    }

    /// Ingest a batch of documents
    pub async fn ingest(
        &self,
        documents: Vec<Document>,
        options: &IngestionOptions,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult> {
        self.ingestion.ingest(documents, options, cancel).await
    }

    /// Ranked context for a query
    pub async fn get_context(
        &self,
        query: &str,
        options: &ContextOptions,
        cancel: &CancellationToken,
    ) -> Result<ContextResponse> {
        self.fusion.get_context(query, options, cancel).await
    }

    /// Start a streaming analysis session
    pub fn analyze(
        &self,
        query: impl Into<String>,
        options: ContextOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisStream> {
        self.sessions.start(query, options, cancel)
    }

    /// Health of one downstream service
    pub async fn check_health(&self, service: &str, cancel: &CancellationToken) -> Result<HealthCheckResult> {
        self.health.check(service, cancel).await
    }

    /// Health of every downstream service
    pub async fn check_all_health(&self, cancel: &CancellationToken) -> Vec<HealthCheckResult> {
        self.health.check_all(cancel).await
    }

    pub fn health_statistics(&self) -> HealthCheckCacheStatistics {
        self.health.statistics()
    }

    /// Remove a document's chunks and relationships
    #[instrument(skip(self, cancel))]
    pub async fn delete_document(&self, document_id: &str, cancel: &CancellationToken) -> Result<DeletedDocument> {
        if document_id.trim().is_empty() {
            return Err(AppError::invalid_field("documentId", "document id must not be empty"));
        }

        let (chunks_deleted, relationships_deleted) = tokio::try_join!(
            self.vector.delete_embeddings(document_id, cancel),
            self.graph.delete_relationships(document_id, cancel),
        )?;

        if chunks_deleted == 0 && relationships_deleted == 0 {
            return Err(AppError::NotFound {
                resource_type: "document".to_string(),
                id: document_id.to_string(),
            });
        }

        info!(
            document_id = document_id,
            chunks = chunks_deleted,
            relationships = relationships_deleted,
            "Document deleted"
        );
        Ok(DeletedDocument { chunks_deleted, relationships_deleted })
    }

    /// Stored chunk and graph counters
    pub async fn stats(&self, cancel: &CancellationToken) -> Result<EngineStats> {
        let (chunk_count, graph) = tokio::try_join!(self.vector.count(cancel), self.graph.stats(cancel))?;
        Ok(EngineStats {
            chunk_count,
            node_count: graph.node_count,
            relationship_count: graph.relationship_count,
        })
    }

    /// Models the LLM provider can serve
    pub async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.llm.list_models(cancel).await
    }

    /// Stop background health probes
    pub fn shutdown(&self) {
        self.health.shutdown();
        info!("Memory context engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EventKind;
    use futures::StreamExt;
    use memctx_common::adapters::{InMemoryGraphStore, InMemoryVectorStore};
    use memctx_common::llm::{MockLlm, MockOperation};
    use memctx_common::models::{HealthStatus, ProcessingStatus};

    fn engine_with(llm: MockLlm) -> MemoryContextEngine {
        MemoryContextEngine::new(
            AppConfig::default(),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(llm),
        )
    }

    #[tokio::test]
    async fn test_ingest_then_query_end_to_end() {
        let engine = engine_with(MockLlm::new(64));
        let cancel = CancellationToken::new();

        let options = IngestionOptions { chunk_size: Some(4), ..IngestionOptions::default() };
        let ingested = engine
            .ingest(vec![Document::new("d1", "AAAA BBBB")], &options, &cancel)
            .await
            .unwrap();
        let d1 = ingested.result_for("d1").unwrap();
        assert_eq!(d1.status, ProcessingStatus::Completed);
        assert_eq!(d1.chunks_created, 3);

        let query = ContextOptions {
            max_documents: 1,
            min_score: 0.0,
            ..engine.default_context_options()
        };
        let response = engine.get_context("AAAA", &query, &cancel).await.unwrap();

        assert_eq!(response.total_results, 1);
        assert_eq!(response.context.documents.len(), 1);
        assert_eq!(response.context.documents[0].id, "d1");
        assert_eq!(response.context.documents[0].content, "AAAA");
    }

    #[tokio::test]
    async fn test_analyze_through_engine() {
        let engine = engine_with(MockLlm::new(64));
        let cancel = CancellationToken::new();
        engine
            .ingest(vec![Document::new("d1", "Tokio schedules tasks.")], &IngestionOptions::default(), &cancel)
            .await
            .unwrap();

        let options = ContextOptions { min_score: 0.0, ..engine.default_context_options() };
        let events: Vec<_> = engine.analyze("tokio", options, &cancel).unwrap().collect().await;

        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Done));
        assert!(events.iter().any(|e| e.kind == EventKind::Analysis));
    }

    #[tokio::test]
    async fn test_delete_document_and_stats() {
        let engine = engine_with(MockLlm::new(64));
        let cancel = CancellationToken::new();
        engine
            .ingest(
                vec![Document::new("d1", "Alpha meets Beta near Gamma.")],
                &IngestionOptions { chunk_size: Some(10), ..IngestionOptions::default() },
                &cancel,
            )
            .await
            .unwrap();

        let stats = engine.stats(&cancel).await.unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.relationship_count, 2);
        assert_eq!(stats.node_count, 3);

        let deleted = engine.delete_document("d1", &cancel).await.unwrap();
        assert_eq!(deleted, DeletedDocument { chunks_deleted: 3, relationships_deleted: 2 });

        let err = engine.delete_document("d1", &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        assert_eq!(engine.stats(&cancel).await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_health_through_engine() {
        let engine = engine_with(MockLlm::new(64).failing(MockOperation::Health));
        let cancel = CancellationToken::new();

        let all = engine.check_all_health(&cancel).await;
        let statuses: Vec<(&str, HealthStatus)> =
            all.iter().map(|r| (r.service_name.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (GRAPH_STORE_SERVICE, HealthStatus::Healthy),
                (LLM_SERVICE, HealthStatus::Unhealthy),
                (VECTOR_STORE_SERVICE, HealthStatus::Healthy),
            ]
        );

        let cached = engine.check_health(LLM_SERVICE, &cancel).await.unwrap();
        assert!(cached.from_cache);

        let stats = engine.health_statistics();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.cache_hits, 1);

        assert!(engine.check_health("unknown", &cancel).await.is_err());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_list_models_passthrough() {
        let engine = engine_with(MockLlm::new(8));
        let models = engine.list_models(&CancellationToken::new()).await.unwrap();
        assert_eq!(models, vec!["mock-embedding".to_string(), "mock-chat".to_string()]);
    }
}
