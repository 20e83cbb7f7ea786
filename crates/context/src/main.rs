//! Memctx command line
//!
//! Usage: `memctx <documents.json> <query>`
//!
//! Ingests a JSON array of documents into in-memory stores, prints the
//! ranked context for the query, streams an analysis session as SSE frames
//! and reports downstream health.

use anyhow::Context as _;
use futures::StreamExt;
use memctx_common::{
    adapters::{InMemoryGraphStore, InMemoryVectorStore},
    config::{AppConfig, ObservabilityConfig},
    llm::create_llm_client,
    metrics::register_metrics,
    models::Document,
    VERSION,
};
use memctx_context::{IngestionOptions, MemoryContextEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Falling back to default configuration: {}", e);
        AppConfig::default()
    });
    config.validate()?;

    init_tracing(&config.observability);
    register_metrics();
    info!(service = %config.observability.service_name, "Starting memctx v{}", VERSION);

    let mut args = std::env::args().skip(1);
    let documents_path = args.next().context("usage: memctx <documents.json> <query>")?;
    let query = args.collect::<Vec<_>>().join(" ");
    anyhow::ensure!(!query.trim().is_empty(), "usage: memctx <documents.json> <query>");

    let raw = tokio::fs::read_to_string(&documents_path)
        .await
        .with_context(|| format!("failed to read {}", documents_path))?;
    let documents: Vec<Document> = serde_json::from_str(&raw).context("invalid documents file")?;

    let llm = create_llm_client(&config.llm)?;
    let engine = MemoryContextEngine::new(
        config.clone(),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryGraphStore::new()),
        llm,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let ingested = engine
        .ingest(documents, &IngestionOptions::default(), &cancel)
        .await?;
    for failure in ingested.results.iter().filter(|r| r.error.is_some()) {
        warn!(document_id = %failure.document_id, error = ?failure.error, "Document not ingested");
    }
    info!(
        successful = ingested.successful_documents,
        failed = ingested.failed_documents,
        elapsed_ms = ingested.total_processing_time_ms,
        "Ingestion complete"
    );

    let options = engine.default_context_options();
    let context = engine.get_context(&query, &options, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&context)?);

    let mut session = engine.analyze(query, options, &cancel)?;
    while let Some(event) = session.next().await {
        print!("{}", event.to_sse_frame());
    }

    for result in engine.check_all_health(&cancel).await {
        println!("{}", serde_json::to_string(&result)?);
    }
    println!("{}", serde_json::to_string(&engine.health_statistics())?);

    engine.shutdown();
    Ok(())
}
