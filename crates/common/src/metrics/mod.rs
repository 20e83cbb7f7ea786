//! Metrics instrumentation
//!
//! Emits through the `metrics` facade; installing a recorder/exporter is left
//! to the embedding application. Without one, every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, gauge, describe_gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all engine metrics
pub const METRICS_PREFIX: &str = "memctx";

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Documents processed by ingestion, by final status"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-document ingestion latency in seconds"
    );

    // Context metrics
    describe_counter!(
        format!("{}_context_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total context retrievals"
    );

    describe_histogram!(
        format!("{}_context_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Context retrieval latency in seconds"
    );

    describe_gauge!(
        format!("{}_context_documents_count", METRICS_PREFIX),
        Unit::Count,
        "Documents returned by the last context retrieval"
    );

    // Session metrics
    describe_counter!(
        format!("{}_sessions_total", METRICS_PREFIX),
        Unit::Count,
        "Analysis sessions, by terminal state"
    );

    // Health cache metrics
    describe_counter!(
        format!("{}_health_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Health checks answered from cache or an in-flight probe"
    );

    describe_counter!(
        format!("{}_health_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Health checks that started a probe"
    );

    tracing::info!("Metrics registered");
}

/// Times one context retrieval
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Record completion with the number of documents returned
    pub fn finish(self, success: bool, documents: usize) {
        let status = if success { "success" } else { "error" };

        counter!(
            format!("{}_context_queries_total", METRICS_PREFIX),
            "status" => status
        )
        .increment(1);

        histogram!(format!("{}_context_duration_seconds", METRICS_PREFIX))
            .record(self.start.elapsed().as_secs_f64());

        if success {
            gauge!(format!("{}_context_documents_count", METRICS_PREFIX)).set(documents as f64);
        }
    }
}

/// Helper to record ingestion of one document
pub fn record_ingestion(duration_secs: f64, chunks_created: usize, status: &str) {
    counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    counter!(format!("{}_chunks_created_total", METRICS_PREFIX)).increment(chunks_created as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record a finished session
pub fn record_session(state: &str) {
    counter!(
        format!("{}_sessions_total", METRICS_PREFIX),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Helper to record health cache outcome
pub fn record_health_cache(hit: bool, service: &str) {
    let name = if hit { "hits" } else { "misses" };
    counter!(
        format!("{}_health_cache_{}_total", METRICS_PREFIX, name),
        "service" => service.to_string()
    )
    .increment(1);
}
