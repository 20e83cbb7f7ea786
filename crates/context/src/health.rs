//! Health check cache
//!
//! Memoizes downstream health probes per service:
//! - Results are served from cache until their TTL expires
//! - Concurrent misses for one service share a single in-flight probe
//! - Probes are bounded by a timeout and by the cache's shutdown token
//!
//! `Cancelled` results are never stored.

use futures::future::{BoxFuture, FutureExt, Shared};
use memctx_common::{
    config::HealthConfig,
    errors::{AppError, Result},
    metrics::record_health_cache,
    models::{HealthCheckCacheStatistics, HealthCheckResult, HealthStatus},
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A registered health probe
pub type HealthProbe = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type PendingProbe = Shared<BoxFuture<'static, HealthCheckResult>>;

#[derive(Clone)]
enum Slot {
    Ready { result: HealthCheckResult, fetched_at: Instant },
    Pending(PendingProbe),
}

/// TTL cache over registered health probes
pub struct HealthCheckCache {
    probes: HashMap<String, HealthProbe>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    ttl: Duration,
    probe_timeout: Duration,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    shutdown: CancellationToken,
}

impl HealthCheckCache {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            probes: HashMap::new(),
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl: config.ttl(),
            probe_timeout: config.probe_timeout(),
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a probe under a service name, replacing any previous one
    pub fn register<F, Fut>(&mut self, service: impl Into<String>, probe: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: HealthProbe = Arc::new(move |cancel: CancellationToken| probe(cancel).boxed());
        self.probes.insert(service.into(), boxed);
    }

    /// Registered service names, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.probes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Health of one service, from cache when fresh
    pub async fn check(&self, service: &str, cancel: &CancellationToken) -> Result<HealthCheckResult> {
        let probe = self.probes.get(service).cloned().ok_or_else(|| AppError::NotFound {
            resource_type: "health probe".to_string(),
            id: service.to_string(),
        })?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let (pending, leader) = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(service) {
                Some(Slot::Ready { result, fetched_at }) if fetched_at.elapsed() < self.ttl => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    record_health_cache(true, service);
                    return Ok(result.cached());
                }
                Some(Slot::Pending(pending)) => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    record_health_cache(true, service);
                    debug!(service = service, "Joining in-flight health probe");
                    (pending.clone(), false)
                }
                _ => {
                    self.cache_misses.fetch_add(1, Ordering::Relaxed);
                    record_health_cache(false, service);
                    let pending = self.spawn_probe(service, probe);
                    slots.insert(service.to_string(), Slot::Pending(pending.clone()));
                    (pending, true)
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(HealthCheckResult::fresh(
                service,
                HealthStatus::Cancelled,
                started.elapsed().as_millis() as u64,
                self.timeout_ms(),
                Some("health check cancelled".to_string()),
            )),
            result = pending => Ok(if leader { result } else { result.cached() }),
        }
    }

    /// Health of every registered service, sorted by name
    pub async fn check_all(&self, cancel: &CancellationToken) -> Vec<HealthCheckResult> {
        let checks = self.services().into_iter().map(|name| async move {
            self.check(&name, cancel).await
        });

        futures::future::join_all(checks)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect()
    }

    /// Lifetime counters
    pub fn statistics(&self) -> HealthCheckCacheStatistics {
        HealthCheckCacheStatistics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Cancel in-flight and future probes
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn timeout_ms(&self) -> u64 {
        self.probe_timeout.as_millis() as u64
    }

    /// Run the probe in its own task; the task records its result in the map
    fn spawn_probe(&self, service: &str, probe: HealthProbe) -> PendingProbe {
        let slots = self.slots.clone();
        let shutdown = self.shutdown.child_token();
        let probe_timeout = self.probe_timeout;
        let timeout_ms = self.timeout_ms();
        let name = service.to_string();

        let handle = tokio::spawn(async move {
            let started = Instant::now();

            let (status, error) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => (HealthStatus::Cancelled, Some("health cache shut down".to_string())),
                outcome = tokio::time::timeout(probe_timeout, probe(shutdown.clone())) => match outcome {
                    Ok(Ok(())) => (HealthStatus::Healthy, None),
                    Ok(Err(e)) if e.is_cancelled() => (HealthStatus::Cancelled, Some(e.to_string())),
                    Ok(Err(e)) => (HealthStatus::Unhealthy, Some(e.to_string())),
                    Err(_) => (HealthStatus::Timeout, Some(format!("probe timed out after {}ms", timeout_ms))),
                },
            };

            let result = HealthCheckResult::fresh(
                &name,
                status,
                started.elapsed().as_millis() as u64,
                timeout_ms,
                error,
            );

            if !result.is_healthy() {
                warn!(service = %name, status = ?result.status, error = ?result.error, "Health probe failed");
            }

            let mut map = slots.lock().unwrap_or_else(|e| e.into_inner());
            if result.status == HealthStatus::Cancelled {
                map.remove(&name);
            } else {
                map.insert(
                    name.clone(),
                    Slot::Ready { result: result.clone(), fetched_at: Instant::now() },
                );
            }
            result
        });

        let service = service.to_string();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => HealthCheckResult::fresh(
                    &service,
                    HealthStatus::Unhealthy,
                    0,
                    timeout_ms,
                    Some(format!("health probe task failed: {}", e)),
                ),
            }
        }
        .boxed()
        .shared()
    }
}

impl Drop for HealthCheckCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
