//! Context fusion
//!
//! Combines vector search hits with graph relationships into one ranked
//! context payload:
//! 1. Embed the query; search `max_documents * over_fetch_factor` candidates
//!    while relationships for the query's entities are fetched concurrently
//! 2. Drop hits below `min_score`, keep the best chunk per document
//! 3. Rank (score desc, ordinal asc, document id asc) and truncate
//! 4. Fetch the surfaced documents' own relationships and those touching
//!    their entities; keep relationships tied to surfaced documents, rank by
//!    confidence, cap
//! 5. Optionally summarize the surfaced documents
//!
//! Graph failures degrade to an empty relationship list; vector failures are
//! returned to the caller.

use memctx_common::{
    adapters::{GraphStore, VectorStore},
    config::EngineConfig,
    errors::{AppError, Result},
    llm::LlmClient,
    metrics::QueryTimer,
    models::{ContextDocument, ContextPayload, ContextResponse, Relationship, VectorSearchResult},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Context retrieval options
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContextOptions {
    /// Maximum documents returned
    #[validate(range(min = 1, max = 100))]
    pub max_documents: usize,

    /// Attach graph relationships
    #[serde(default = "default_true")]
    pub include_relationships: bool,

    /// Minimum similarity score (0.0 - 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_score: f32,

    /// Summarize surfaced documents
    #[serde(default)]
    pub summarize: bool,
}

fn default_true() -> bool { true }

impl ContextOptions {
    /// Options filled from engine defaults
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_documents: config.default_max_documents,
            include_relationships: true,
            min_score: config.default_min_score,
            summarize: false,
        }
    }

    /// Range checks plus rejecting a NaN score
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()?;
        if self.min_score.is_nan() {
            return Err(AppError::invalid_field("minScore", "min score must be a number"));
        }
        Ok(())
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Fusion engine over shared adapters
pub struct ContextFusion {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
}

impl ContextFusion {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
        config: EngineConfig,
    ) -> Self {
        Self { vector, graph, llm, config }
    }

    /// Retrieve ranked context for a query
    #[instrument(skip(self, options, cancel), fields(max_documents = options.max_documents))]
    pub async fn get_context(
        &self,
        query: &str,
        options: &ContextOptions,
        cancel: &CancellationToken,
    ) -> Result<ContextResponse> {
        validate_request(query, options)?;

        let timer = QueryTimer::start();
        let result = self.assemble(query, options, cancel).await;

        match &result {
            Ok(response) => {
                info!(
                    documents = response.context.documents.len(),
                    relationships = response.context.relationships.len(),
                    total_results = response.total_results,
                    elapsed_ms = response.processing_time_ms,
                    "Context assembled"
                );
                timer.finish(true, response.context.documents.len());
            }
            Err(e) => {
                warn!(error = %e, "Context retrieval failed");
                timer.finish(false, 0);
            }
        }

        result
    }

    async fn assemble(
        &self,
        query: &str,
        options: &ContextOptions,
        cancel: &CancellationToken,
    ) -> Result<ContextResponse> {
        let start = Instant::now();
        let trimmed = query.trim();

        let embedding = self.llm.embed(trimmed, cancel).await?;
        let limit = options
            .max_documents
            .saturating_mul(self.config.over_fetch_factor.max(1));
        let entities = query_entities(trimmed);

        let graph_fetch = async {
            if options.include_relationships {
                Some(self.graph.query(&entities, cancel).await)
            } else {
                None
            }
        };

        // Both calls must settle before ranking
        let (hits, fetched) = tokio::join!(
            self.vector.search(&embedding, limit, options.min_score, cancel),
            graph_fetch,
        );
        let hits = hits?;
        debug!(candidates = hits.len(), limit = limit, "Vector search returned");

        let (documents, total_results) = rank_documents(hits, options.min_score, options.max_documents);

        let relationships = match fetched {
            Some(Ok(mut candidates)) => {
                match self.surfaced_relationships(&documents, cancel).await {
                    Ok(owned) => candidates.extend(owned),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => warn!(error = %e, "Surfaced document relationships unavailable"),
                }
                select_relationships(candidates, &documents, self.config.relationship_budget)
            }
            Some(Err(e)) if e.is_cancelled() => return Err(e),
            Some(Err(e)) => {
                warn!(error = %e, "Graph fetch failed, omitting relationships");
                Vec::new()
            }
            None => Vec::new(),
        };

        let summary = if options.summarize && !documents.is_empty() {
            self.summarize(&documents, cancel).await?
        } else {
            None
        };

        Ok(ContextResponse {
            query: query.to_string(),
            context: ContextPayload { documents, relationships, summary },
            total_results,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Relationships extracted from the surfaced documents plus every
    /// relationship touching their entities
    async fn surfaced_relationships(
        &self,
        documents: &[ContextDocument],
        cancel: &CancellationToken,
    ) -> Result<Vec<Relationship>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let owned = self.graph.document_relationships(&ids, cancel).await?;

        let mut seen = HashSet::new();
        let entities: Vec<String> = owned
            .iter()
            .flat_map(|r| [r.source.to_lowercase(), r.target.to_lowercase()])
            .filter(|entity| seen.insert(entity.clone()))
            .collect();
        if entities.is_empty() {
            return Ok(owned);
        }

        let mut touching = self.graph.query(&entities, cancel).await?;
        debug!(owned = owned.len(), touching = touching.len(), "Surfaced document relationships fetched");
        touching.extend(owned);
        Ok(touching)
    }

    /// Summary of surfaced documents; adapter failures degrade to `None`
    async fn summarize(&self, documents: &[ContextDocument], cancel: &CancellationToken) -> Result<Option<String>> {
        let text = documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        match self.llm.summarize(&text, cancel).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(error = %e, "Context summary failed");
                Ok(None)
            }
        }
    }
}

/// Reject blank queries and out-of-range options before any adapter call
pub fn validate_request(query: &str, options: &ContextOptions) -> Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::invalid_field("query", "query must not be empty"));
    }
    options.ensure_valid()
}

/// Entity ids mentioned by a query: lowercase terms plus the whole query
pub fn query_entities(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() >= 2)
        .map(|term| term.to_lowercase())
        .filter(|term| seen.insert(term.clone()))
        .collect();

    let whole = query.trim().to_lowercase();
    if !whole.is_empty() && seen.insert(whole.clone()) {
        entities.push(whole);
    }
    entities
}

/// Filter, deduplicate per document, rank and truncate
///
/// Returns the surfaced documents and the candidate count before truncation.
pub fn rank_documents(
    hits: Vec<VectorSearchResult>,
    min_score: f32,
    max_documents: usize,
) -> (Vec<ContextDocument>, usize) {
    let mut best: HashMap<String, VectorSearchResult> = HashMap::new();

    for hit in hits.into_iter().filter(|h| h.score >= min_score) {
        match best.get(&hit.document_id) {
            Some(existing) if hit.rank_cmp(existing) != Ordering::Less => {}
            _ => {
                best.insert(hit.document_id.clone(), hit);
            }
        }
    }

    let mut ranked: Vec<VectorSearchResult> = best.into_values().collect();
    ranked.sort_by(|a, b| a.rank_cmp(b));

    let total = ranked.len();
    ranked.truncate(max_documents);

    (ranked.into_iter().map(ContextDocument::from).collect(), total)
}

/// Keep relationships tied to surfaced documents
///
/// Duplicate candidates (same provenance and edge) collapse to one. A relationship is kept when a surfaced document produced it, or when one of
/// its endpoints is an entity of such a relationship.
pub fn select_relationships(
    candidates: Vec<Relationship>,
    documents: &[ContextDocument],
    budget: usize,
) -> Vec<Relationship> {
    let surfaced: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();

    let mut seen = HashSet::new();
    let candidates: Vec<Relationship> = candidates
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.document_id.clone(),
                r.source.clone(),
                r.target.clone(),
                r.relationship_type.clone(),
            ))
        })
        .collect();

    let entities: HashSet<String> = candidates
        .iter()
        .filter(|r| surfaced.contains(r.document_id.as_str()))
        .flat_map(|r| [r.source.to_lowercase(), r.target.to_lowercase()])
        .collect();

    let mut kept: Vec<Relationship> = candidates
        .into_iter()
        .filter(|r| {
            surfaced.contains(r.document_id.as_str())
                || entities.contains(&r.source.to_lowercase())
                || entities.contains(&r.target.to_lowercase())
        })
        .collect();

    kept.sort_by(|a, b| a.rank_cmp(b));
    kept.truncate(budget);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memctx_common::adapters::InMemoryGraphStore;
    use memctx_common::errors::AdapterKind;
    use memctx_common::llm::{MockLlm, MockOperation};
    use memctx_common::models::GraphStats;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Returns preset hits regardless of the query
    #[derive(Default)]
    struct StaticVectorStore {
        hits: Vec<VectorSearchResult>,
        fail: bool,
        requested_limit: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for StaticVectorStore {
        async fn store_embeddings(&self, _: &str, chunks: &[memctx_common::models::EmbeddedChunk], _: &CancellationToken) -> Result<usize> {
            Ok(chunks.len())
        }

        async fn search(&self, _: &[f32], limit: usize, _: f32, _: &CancellationToken) -> Result<Vec<VectorSearchResult>> {
            self.requested_limit.store(limit, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(AppError::adapter(AdapterKind::VectorStore, "index offline"));
            }
            Ok(self.hits.clone())
        }

        async fn delete_embeddings(&self, _: &str, _: &CancellationToken) -> Result<usize> {
            Ok(0)
        }

        async fn count(&self, _: &CancellationToken) -> Result<u64> {
            Ok(self.hits.len() as u64)
        }

        async fn health_check(&self, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    struct FailingGraph;

    #[async_trait]
    impl GraphStore for FailingGraph {
        async fn upsert_relationships(&self, _: &str, _: &[Relationship], _: &CancellationToken) -> Result<usize> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }

        async fn delete_relationships(&self, _: &str, _: &CancellationToken) -> Result<usize> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }

        async fn query(&self, _: &[String], _: &CancellationToken) -> Result<Vec<Relationship>> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }

        async fn document_relationships(&self, _: &[String], _: &CancellationToken) -> Result<Vec<Relationship>> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }

        async fn stats(&self, _: &CancellationToken) -> Result<GraphStats> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }

        async fn health_check(&self, _: &CancellationToken) -> Result<()> {
            Err(AppError::adapter(AdapterKind::GraphStore, "graph offline"))
        }
    }

    fn hit(doc: &str, ordinal: usize, score: f32) -> VectorSearchResult {
        VectorSearchResult {
            document_id: doc.to_string(),
            ordinal,
            content: format!("{} chunk {}", doc, ordinal),
            score,
            metadata: serde_json::json!({}),
        }
    }

    fn options(max_documents: usize, min_score: f32) -> ContextOptions {
        ContextOptions {
            max_documents,
            include_relationships: true,
            min_score,
            summarize: false,
        }
    }

    fn fusion_with(vector: Arc<dyn VectorStore>, graph: Arc<dyn GraphStore>, llm: MockLlm) -> ContextFusion {
        ContextFusion::new(vector, graph, Arc::new(llm), EngineConfig::default())
    }

    fn sample_hits() -> Vec<VectorSearchResult> {
        vec![
            hit("a", 0, 0.9),
            hit("a", 1, 0.95),
            hit("b", 2, 0.8),
            hit("c", 0, 0.8),
            hit("d", 0, 0.2),
            hit("b", 0, 0.8),
        ]
    }

    #[test]
    fn test_rank_documents_dedups_sorts_and_truncates() {
        let (documents, total) = rank_documents(sample_hits(), 0.3, 2);
        let surfaced: Vec<(&str, usize)> = documents.iter().map(|d| (d.id.as_str(), d.ordinal)).collect();

        assert_eq!(total, 3);
        assert_eq!(surfaced, vec![("a", 1), ("b", 0)]);
        assert!(documents.iter().all(|d| d.score >= 0.3));
    }

    #[test]
    fn test_rank_documents_is_deterministic() {
        let mut reversed = sample_hits();
        reversed.reverse();

        let (forward, _) = rank_documents(sample_hits(), 0.0, 10);
        let (backward, _) = rank_documents(reversed, 0.0, 10);
        assert_eq!(forward, backward);
        let ids: Vec<&str> = forward.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_query_entities() {
        assert_eq!(
            query_entities("  Rust, rust & a OCaml "),
            vec!["rust".to_string(), "ocaml".to_string(), "rust, rust & a ocaml".to_string()]
        );
        assert_eq!(query_entities("rust"), vec!["rust".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let fusion = fusion_with(Arc::new(StaticVectorStore::default()), Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));
        let err = fusion
            .get_context("   ", &ContextOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let fusion = fusion_with(Arc::new(StaticVectorStore::default()), Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));
        let cancel = CancellationToken::new();

        for bad in [options(0, 0.5), options(101, 0.5), options(5, 1.5), options(5, f32::NAN)] {
            let err = fusion.get_context("q", &bad, &cancel).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_over_fetch_and_total_results() {
        let vector = Arc::new(StaticVectorStore { hits: sample_hits(), ..Default::default() });
        let fusion = fusion_with(vector.clone(), Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));

        let response = fusion
            .get_context("anything", &options(2, 0.3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(vector.requested_limit.load(AtomicOrdering::SeqCst), 6);
        assert_eq!(response.total_results, 3);
        assert_eq!(response.context.documents.len(), 2);
        assert!(response.is_truncated());
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_success() {
        let vector = Arc::new(StaticVectorStore { hits: vec![hit("a", 0, 0.1)], ..Default::default() });
        let fusion = fusion_with(vector, Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));

        let response = fusion
            .get_context("anything", &options(5, 0.5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(response.context.documents.is_empty());
        assert!(response.context.relationships.is_empty());
        assert_eq!(response.total_results, 0);
    }

    #[tokio::test]
    async fn test_relationships_follow_surfaced_documents() {
        let cancel = CancellationToken::new();
        let graph = Arc::new(InMemoryGraphStore::new());
        graph
            .upsert_relationships("a", &[Relationship::new("Rust", "uses", "Cargo", 0.5)], &cancel)
            .await
            .unwrap();
        graph
            .upsert_relationships(
                "z",
                &[
                    Relationship::new("Haskell", "influenced", "Rust", 0.7),
                    Relationship::new("OCaml", "uses", "Dune", 0.9),
                ],
                &cancel,
            )
            .await
            .unwrap();

        let vector = Arc::new(StaticVectorStore { hits: vec![hit("a", 0, 0.9)], ..Default::default() });
        let fusion = fusion_with(vector, graph, MockLlm::new(8));

        let response = fusion.get_context("rust ocaml", &options(5, 0.3), &cancel).await.unwrap();
        let edges: Vec<(&str, &str)> = response
            .context
            .relationships
            .iter()
            .map(|r| (r.source.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(edges, vec![("Haskell", "Rust"), ("Rust", "Cargo")]);
    }

    #[tokio::test]
    async fn test_surfaced_document_relationships_without_query_entities() {
        let cancel = CancellationToken::new();
        let graph = Arc::new(InMemoryGraphStore::new());
        graph
            .upsert_relationships("d1", &[Relationship::new("Alpha", "meets", "Beta", 0.9)], &cancel)
            .await
            .unwrap();
        graph
            .upsert_relationships("z", &[Relationship::new("Beta", "knows", "Gamma", 0.6)], &cancel)
            .await
            .unwrap();
        graph
            .upsert_relationships("y", &[Relationship::new("Delta", "owns", "Epsilon", 1.0)], &cancel)
            .await
            .unwrap();

        let vector = Arc::new(StaticVectorStore { hits: vec![hit("d1", 0, 0.9)], ..Default::default() });
        let fusion = fusion_with(vector, graph, MockLlm::new(8));

        let response = fusion
            .get_context("who meets in the garden", &options(5, 0.0), &cancel)
            .await
            .unwrap();
        let edges: Vec<(&str, &str)> = response
            .context
            .relationships
            .iter()
            .map(|r| (r.source.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(edges, vec![("Alpha", "Beta"), ("Beta", "Gamma")]);
    }

    #[test]
    fn test_duplicate_candidates_collapse() {
        let documents = vec![ContextDocument::from(hit("a", 0, 0.9))];
        let edge = Relationship::new("x", "r", "y", 0.5).for_document("a");
        let kept = select_relationships(vec![edge.clone(), edge.clone()], &documents, 10);
        assert_eq!(kept, vec![edge]);
    }

    #[test]
    fn test_relationship_budget() {
        let documents = vec![ContextDocument::from(hit("a", 0, 0.9))];
        let candidates = vec![
            Relationship::new("x", "r", "y", 0.2).for_document("a"),
            Relationship::new("x", "r", "z", 0.8).for_document("a"),
            Relationship::new("x", "r", "w", 0.5).for_document("a"),
        ];
        let kept = select_relationships(candidates, &documents, 2);
        let targets: Vec<&str> = kept.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["z", "w"]);
    }

    #[tokio::test]
    async fn test_graph_failure_degrades() {
        let vector = Arc::new(StaticVectorStore { hits: vec![hit("a", 0, 0.9)], ..Default::default() });
        let fusion = fusion_with(vector, Arc::new(FailingGraph), MockLlm::new(8));

        let response = fusion
            .get_context("rust", &options(5, 0.3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.context.documents.len(), 1);
        assert!(response.context.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_vector_failure_is_fatal() {
        let vector = Arc::new(StaticVectorStore { fail: true, ..Default::default() });
        let fusion = fusion_with(vector, Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));

        let err = fusion
            .get_context("rust", &options(5, 0.3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Adapter { adapter: AdapterKind::VectorStore, .. }));
    }

    #[tokio::test]
    async fn test_summary_degrades_on_failure() {
        let cancel = CancellationToken::new();
        let mut summarized = options(5, 0.3);
        summarized.summarize = true;

        let vector = Arc::new(StaticVectorStore { hits: vec![hit("a", 0, 0.9)], ..Default::default() });
        let ok = fusion_with(vector.clone(), Arc::new(InMemoryGraphStore::new()), MockLlm::new(8));
        let response = ok.get_context("rust", &summarized, &cancel).await.unwrap();
        assert_eq!(response.context.summary.as_deref(), Some("a chunk 0"));

        let failing = fusion_with(
            vector,
            Arc::new(InMemoryGraphStore::new()),
            MockLlm::new(8).failing(MockOperation::Summarize),
        );
        let response = failing.get_context("rust", &summarized, &cancel).await.unwrap();
        assert!(response.context.summary.is_none());
        assert_eq!(response.context.documents.len(), 1);
    }
}
