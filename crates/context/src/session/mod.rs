//! Streaming analysis sessions
//!
//! A session retrieves context for a query, then streams an LLM analysis of
//! it as ordered [`SessionEvent`]s. Each session runs in its own task that
//! feeds a bounded channel; the consumer side is an [`AnalysisStream`].
//!
//! Cancellation is cooperative: the caller's token, or dropping the stream,
//! stops the producer at its next await point and drops any in-flight
//! adapter call.

mod events;
mod state;

pub use events::{AnalysisMetadata, EventKind, SessionEvent, DONE_PAYLOAD};
pub use state::SessionState;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use memctx_common::{
    errors::{AppError, Result},
    llm::{ChatMessage, LlmClient},
    metrics::record_session,
    models::ContextResponse,
};
use std::convert::Infallible;
use std::fmt::Write as _;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::fusion::{validate_request, ContextFusion, ContextOptions};

const ANALYSIS_PROMPT: &str = "You are an analysis assistant. Answer the user's query using \
    only the documents and relationships provided. Cite document ids when you rely on them.";

const NO_CONTEXT_MESSAGE: &str = "No relevant context found for the given query.";

/// Starts analysis sessions over a shared fusion engine
pub struct AnalysisSessions {
    fusion: Arc<ContextFusion>,
    llm: Arc<dyn LlmClient>,
    buffer: usize,
}

impl AnalysisSessions {
    pub fn new(fusion: Arc<ContextFusion>, llm: Arc<dyn LlmClient>, buffer: usize) -> Self {
        Self { fusion, llm, buffer: buffer.max(1) }
    }

    /// Start a session
    ///
    /// Invalid input is rejected here, before any event is produced.
    pub fn start(
        &self,
        query: impl Into<String>,
        options: ContextOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisStream> {
        let query = query.into();
        validate_request(&query, &options)?;

        let (events, receiver) = mpsc::channel(self.buffer);
        let (state, state_rx) = watch::channel(SessionState::Created);
        let session_cancel = cancel.child_token();

        let producer = Producer {
            fusion: self.fusion.clone(),
            llm: self.llm.clone(),
            events,
            state,
            current: SessionState::Created,
            cancel: session_cancel.clone(),
            query,
            options,
            started: Instant::now(),
        };
        tokio::spawn(producer.run());

        Ok(AnalysisStream {
            receiver,
            state: state_rx,
            _guard: session_cancel.drop_guard(),
        })
    }
}

/// Consumer side of a session
///
/// Dropping it cancels the session.
pub struct AnalysisStream {
    receiver: mpsc::Receiver<SessionEvent>,
    state: watch::Receiver<SessionState>,
    _guard: DropGuard,
}

impl AnalysisStream {
    /// Latest session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Map into axum SSE events
    pub fn into_sse(self) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send {
        self.map(|event| Ok(event.to_axum_event()))
    }
}

impl Stream for AnalysisStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Producer side of a session, owned by its task
struct Producer {
    fusion: Arc<ContextFusion>,
    llm: Arc<dyn LlmClient>,
    events: mpsc::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    current: SessionState,
    cancel: CancellationToken,
    query: String,
    options: ContextOptions,
    started: Instant,
}

/// Why a session stopped early
enum Halt {
    Cancelled,
    Failed(AppError),
}

impl From<AppError> for Halt {
    fn from(err: AppError) -> Self {
        if err.is_cancelled() {
            Halt::Cancelled
        } else {
            Halt::Failed(err)
        }
    }
}

impl Producer {
    async fn run(mut self) {
        let outcome = self.drive().await;

        match outcome {
            Ok(()) => {}
            Err(Halt::Cancelled) => {
                self.advance(SessionState::Cancelled);
                info!(query = %self.query, "Analysis session cancelled");
            }
            Err(Halt::Failed(e)) => self.fail(e).await,
        }

        record_session(self.current.as_str());
    }

    /// Deliver the terminal error event; an undelivered error counts as a
    /// cancelled session
    async fn fail(&mut self, error: AppError) {
        warn!(query = %self.query, error = %error, "Analysis session failed");
        match self.emit(SessionEvent::error(error.to_string())).await {
            Ok(()) => self.advance(SessionState::Errored),
            Err(_) => {
                self.advance(SessionState::Cancelled);
                info!(query = %self.query, "Consumer gone before the error was delivered");
            }
        }
    }

    async fn drive(&mut self) -> std::result::Result<(), Halt> {
        self.emit(SessionEvent::status("Starting context retrieval...")).await?;

        let response = {
            let retrieval = self.fusion.get_context(&self.query, &self.options, &self.cancel);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                result = retrieval => result?,
            }
        };

        self.advance(SessionState::ContextRetrieved);
        let found = response.context.documents.len();
        self.emit(SessionEvent::status(format!("Found {} relevant documents", found)))
            .await?;

        if found == 0 {
            self.emit(SessionEvent::analysis(NO_CONTEXT_MESSAGE)).await?;
            self.finish(&response, 0).await?;
            return Ok(());
        }

        let messages = build_prompt(&self.query, &response);
        self.advance(SessionState::Analyzing);
        self.emit(SessionEvent::status("Generating analysis...")).await?;

        let mut increments = {
            let request = self.llm.stream_chat(&messages, &self.cancel);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                result = request => result?,
            }
        };

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                next = increments.next() => next,
            };

            match next {
                None => break,
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    chunks += 1;
                    self.emit(SessionEvent::analysis(text)).await?;
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }

        debug!(chunks = chunks, "Analysis stream exhausted");
        self.emit(SessionEvent::status("Analysis complete")).await?;
        self.finish(&response, chunks).await
    }

    /// Metadata then `done`
    async fn finish(&mut self, response: &ContextResponse, chunks: usize) -> std::result::Result<(), Halt> {
        let metadata = AnalysisMetadata {
            documents_analyzed: response.context.documents.len(),
            relationships_found: response.context.relationships.len(),
            processing_time_ms: self.started.elapsed().as_millis() as u64,
            total_analysis_chunks: chunks,
        };
        self.emit(SessionEvent::metadata(&metadata)?).await?;
        self.emit(SessionEvent::done()).await?;
        self.advance(SessionState::Completed);

        info!(
            documents = metadata.documents_analyzed,
            chunks = chunks,
            elapsed_ms = metadata.processing_time_ms,
            "Analysis session completed"
        );
        Ok(())
    }

    /// Send one event; a cancelled session or a dropped consumer halts
    async fn emit(&self, event: SessionEvent) -> std::result::Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| Halt::Cancelled),
        }
    }

    fn advance(&mut self, next: SessionState) {
        match self.current.transition(next) {
            Ok(state) => {
                self.current = state;
                self.state.send_replace(state);
            }
            Err(e) => warn!(error = %e, "Ignoring invalid session transition"),
        }
    }
}

/// Analysis request over the retrieved documents and relationships
fn build_prompt(query: &str, response: &ContextResponse) -> Vec<ChatMessage> {
    let mut context = String::from("Documents:\n");
    for (i, document) in response.context.documents.iter().enumerate() {
        let _ = writeln!(
            context,
            "[{}] {} (score {:.2})\n{}\n",
            i + 1,
            document.id,
            document.score,
            document.content
        );
    }

    if !response.context.relationships.is_empty() {
        context.push_str("Relationships:\n");
        for r in &response.context.relationships {
            let _ = writeln!(
                context,
                "- {} {} {} ({:.2})",
                r.source, r.relationship_type, r.target, r.confidence
            );
        }
    }

    vec![
        ChatMessage::system(ANALYSIS_PROMPT),
        ChatMessage::user(format!("Query: {}\n\n{}", query, context)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{IngestionOptions, IngestionPipeline};
    use memctx_common::adapters::{InMemoryGraphStore, InMemoryVectorStore};
    use memctx_common::config::EngineConfig;
    use memctx_common::llm::{MockLlm, MockOperation};
    use memctx_common::models::Document;
    use std::time::Duration;

    async fn sessions(llm: Arc<MockLlm>, documents: Vec<Document>) -> AnalysisSessions {
        let vector = Arc::new(InMemoryVectorStore::new());
        let graph = Arc::new(InMemoryGraphStore::new());
        let config = EngineConfig::default();

        if !documents.is_empty() {
            let pipeline = IngestionPipeline::new(vector.clone(), graph.clone(), llm.clone(), config.clone());
            pipeline
                .ingest(documents, &IngestionOptions::default(), &CancellationToken::new())
                .await
                .unwrap();
        }

        let fusion = Arc::new(ContextFusion::new(vector, graph, llm.clone(), config.clone()));
        AnalysisSessions::new(fusion, llm, config.session_buffer)
    }

    fn open_options() -> ContextOptions {
        ContextOptions { min_score: 0.0, ..ContextOptions::default() }
    }

    fn kinds(events: &[SessionEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    fn rust_doc() -> Vec<Document> {
        vec![Document::new("d1", "Rust ownership keeps memory safe.")]
    }

    #[tokio::test]
    async fn test_full_session_event_order() {
        let llm = Arc::new(MockLlm::new(64).with_script(["Ownership ", "", "matters."]));
        let sessions = sessions(llm, rust_doc()).await;

        let stream = sessions
            .start("rust ownership", open_options(), &CancellationToken::new())
            .unwrap();
        let events: Vec<SessionEvent> = stream.collect().await;

        use EventKind::*;
        assert_eq!(
            kinds(&events),
            vec![Status, Status, Status, Analysis, Analysis, Status, Metadata, Done]
        );
        assert_eq!(events[0].data, "Starting context retrieval...");
        assert_eq!(events[1].data, "Found 1 relevant documents");
        assert_eq!(events[2].data, "Generating analysis...");
        assert_eq!(events[3].data, "Ownership ");
        assert_eq!(events[4].data, "matters.");
        assert_eq!(events[5].data, "Analysis complete");
        assert_eq!(events[7].data, DONE_PAYLOAD);

        let metadata: serde_json::Value = serde_json::from_str(&events[6].data).unwrap();
        assert_eq!(metadata["documents_analyzed"], 1);
        assert_eq!(metadata["total_analysis_chunks"], 2);
    }

    #[tokio::test]
    async fn test_session_without_context() {
        let llm = Arc::new(MockLlm::new(64).failing(MockOperation::StreamChat));
        let sessions = sessions(llm, Vec::new()).await;

        let mut stream = sessions
            .start("anything", open_options(), &CancellationToken::new())
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        use EventKind::*;
        assert_eq!(kinds(&events), vec![Status, Status, Analysis, Metadata, Done]);
        assert_eq!(events[1].data, "Found 0 relevant documents");
        assert_eq!(events[2].data, NO_CONTEXT_MESSAGE);
        assert_eq!(stream.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal() {
        let llm = Arc::new(MockLlm::new(64).with_script(["a", "b", "c"]).failing_stream_after(1));
        let sessions = sessions(llm, rust_doc()).await;

        let mut stream = sessions
            .start("rust", open_options(), &CancellationToken::new())
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        let terminal: Vec<&SessionEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Error));
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Analysis).count(), 1);
        assert_eq!(stream.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_stream_start_failure_is_terminal() {
        let llm = Arc::new(MockLlm::new(64).failing(MockOperation::StreamChat));
        let sessions = sessions(llm, rust_doc()).await;

        let events: Vec<SessionEvent> = sessions
            .start("rust", open_options(), &CancellationToken::new())
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Error));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_query_rejected_before_start() {
        let sessions = sessions(Arc::new(MockLlm::new(64)), Vec::new()).await;
        let result = sessions.start("  ", open_options(), &CancellationToken::new());
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_emitting() {
        let script: Vec<String> = (0..50).map(|i| format!("part{} ", i)).collect();
        let llm = Arc::new(MockLlm::new(64).with_script(script).with_stream_delay(Duration::from_millis(20)));
        let sessions = sessions(llm.clone(), rust_doc()).await;

        let cancel = CancellationToken::new();
        let mut stream = sessions.start("rust", open_options(), &cancel).unwrap();

        while let Some(event) = stream.next().await {
            if event.kind == EventKind::Analysis {
                cancel.cancel();
                break;
            }
        }

        let mut rest = Vec::new();
        while let Some(event) = stream.next().await {
            rest.push(event);
        }

        assert!(rest.iter().all(|e| !e.is_terminal()));
        assert!(rest.iter().all(|e| e.kind == EventKind::Analysis));
        assert_eq!(stream.state(), SessionState::Cancelled);
        assert!(llm.increments_produced() < 50);
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_producer() {
        let script: Vec<String> = (0..50).map(|i| format!("part{} ", i)).collect();
        let llm = Arc::new(MockLlm::new(64).with_script(script).with_stream_delay(Duration::from_millis(20)));
        let sessions = sessions(llm.clone(), rust_doc()).await;

        let mut stream = sessions
            .start("rust", open_options(), &CancellationToken::new())
            .unwrap();
        while let Some(event) = stream.next().await {
            if event.kind == EventKind::Analysis {
                break;
            }
        }
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let produced = llm.increments_produced();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(llm.increments_produced(), produced);
        assert!(produced < 50);
    }

    fn detached_producer(cancel: CancellationToken) -> (Producer, mpsc::Receiver<SessionEvent>, watch::Receiver<SessionState>) {
        let llm = Arc::new(MockLlm::new(64));
        let fusion = Arc::new(ContextFusion::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryGraphStore::new()),
            llm.clone(),
            EngineConfig::default(),
        ));
        let (events, receiver) = mpsc::channel(1);
        let (state, state_rx) = watch::channel(SessionState::Created);

        let producer = Producer {
            fusion,
            llm,
            events,
            state,
            current: SessionState::Created,
            cancel,
            query: "rust".into(),
            options: open_options(),
            started: Instant::now(),
        };
        (producer, receiver, state_rx)
    }

    #[tokio::test]
    async fn test_delivered_error_records_errored() {
        let (mut producer, mut receiver, state) = detached_producer(CancellationToken::new());

        producer.fail(AppError::Internal { message: "boom".into() }).await;

        assert_eq!(receiver.recv().await.map(|e| e.kind), Some(EventKind::Error));
        assert_eq!(*state.borrow(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_undelivered_error_records_cancelled() {
        let (mut producer, receiver, state) = detached_producer(CancellationToken::new());
        drop(receiver);

        producer.fail(AppError::Internal { message: "boom".into() }).await;
        assert_eq!(*state.borrow(), SessionState::Cancelled);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut producer, _receiver, state) = detached_producer(cancel);
        producer.fail(AppError::Internal { message: "boom".into() }).await;
        assert_eq!(*state.borrow(), SessionState::Cancelled);
    }

    #[test]
    fn test_prompt_lists_documents_and_relationships() {
        use memctx_common::models::{ContextDocument, ContextPayload, Relationship};

        let response = ContextResponse {
            query: "q".into(),
            context: ContextPayload {
                documents: vec![ContextDocument {
                    id: "d1".into(),
                    content: "Rust is safe.".into(),
                    score: 0.875,
                    ordinal: 0,
                    metadata: serde_json::json!({}),
                }],
                relationships: vec![Relationship::new("Rust", "uses", "LLVM", 0.9)],
                summary: None,
            },
            total_results: 1,
            processing_time_ms: 1,
        };

        let messages = build_prompt("why rust?", &response);
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.starts_with("Query: why rust?"));
        assert!(user.contains("[1] d1 (score 0.88)"));
        assert!(user.contains("- Rust uses LLVM (0.90)"));
    }
}
