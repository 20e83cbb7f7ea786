//! Health probe results and cache statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Timeout,
    Cancelled,
}

/// Result of a health check, cached or fresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub service_name: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,

    /// 0 - 100
    pub score: u8,

    pub from_cache: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// Build a fresh result; healthy scores drop as latency approaches the timeout
    pub fn fresh(
        service_name: &str,
        status: HealthStatus,
        response_time_ms: u64,
        timeout_ms: u64,
        error: Option<String>,
    ) -> Self {
        let score = match status {
            HealthStatus::Healthy => {
                let penalty = if timeout_ms == 0 {
                    0
                } else {
                    (response_time_ms.min(timeout_ms) * 50) / timeout_ms
                };
                (100 - penalty) as u8
            }
            HealthStatus::Unhealthy | HealthStatus::Timeout | HealthStatus::Cancelled => 0,
        };

        Self {
            service_name: service_name.to_string(),
            status,
            response_time_ms,
            timestamp: Utc::now(),
            score,
            from_cache: false,
            error,
        }
    }

    /// Copy marked as served from cache
    pub fn cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Counters for the health check cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckCacheStatistics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl HealthCheckCacheStatistics {
    /// Hits over total requests (0.0 when nothing was requested)
    pub fn hit_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_by_status_and_latency() {
        let fast = HealthCheckResult::fresh("llm", HealthStatus::Healthy, 0, 1000, None);
        let slow = HealthCheckResult::fresh("llm", HealthStatus::Healthy, 1000, 1000, None);
        let down = HealthCheckResult::fresh("llm", HealthStatus::Unhealthy, 3, 1000, Some("boom".into()));

        assert_eq!(fast.score, 100);
        assert_eq!(slow.score, 50);
        assert_eq!(down.score, 0);
        assert!(!fast.from_cache);
        assert!(fast.cached().from_cache);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = HealthCheckCacheStatistics { total_requests: 4, cache_hits: 3, cache_misses: 1 };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(HealthCheckCacheStatistics::default().hit_ratio(), 0.0);
    }
}
