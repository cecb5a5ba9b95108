//! Authorization service metrics

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Service counters and permission check latency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    /// Permission checks answered
    pub total_checks: u64,
    pub allowed_checks: u64,
    pub denied_checks: u64,

    /// Assignments written
    pub grants: u64,
    /// Assignments deleted
    pub revocations: u64,
    /// Mutations that found nothing to change
    pub unchanged: u64,

    /// Mutations rejected by delegation rules
    pub rejected: u64,

    /// Store, cancellation and other failures
    pub error_count: u64,

    /// Scope chain cache, copied from the resolver at snapshot time
    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Check latency percentiles (p50, p90, p99)
    pub check_latency_p50_ms: f64,
    pub check_latency_p90_ms: f64,
    pub check_latency_p99_ms: f64,

    pub avg_check_latency_ms: f64,
}

impl ServiceMetrics {
    pub fn allow_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.allowed_checks as f64 / self.total_checks as f64
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Outcome of an assign or revoke, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationOutcome {
    Granted,
    Revoked,
    Unchanged,
}

/// Metrics collector shared by service clones
pub struct MetricsCollector {
    metrics: Arc<RwLock<ServiceMetrics>>,

    /// Recent check latencies for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_max_samples(10_000)
    }

    pub fn with_max_samples(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(max_samples))),
            max_samples,
        }
    }

    /// Records a permission check and its latency
    pub async fn record_check(&self, allowed: bool, latency: Duration) {
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_checks += 1;
            if allowed {
                metrics.allowed_checks += 1;
            } else {
                metrics.denied_checks += 1;
            }
        }
        self.record_latency(latency).await;
    }

    pub(crate) async fn record_mutation(&self, outcome: MutationOutcome) {
        let mut metrics = self.metrics.write().await;
        match outcome {
            MutationOutcome::Granted => metrics.grants += 1,
            MutationOutcome::Revoked => metrics.revocations += 1,
            MutationOutcome::Unchanged => metrics.unchanged += 1,
        }
    }

    pub async fn record_rejection(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.rejected += 1;
    }

    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.error_count += 1;
    }

    async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Drop the oldest tenth once full
        if samples.len() > self.max_samples {
            let excess = (self.max_samples / 10).max(1);
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut metrics = self.metrics.write().await;
        metrics.avg_check_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.check_latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.check_latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.check_latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub async fn snapshot(&self) -> ServiceMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = ServiceMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Renders a snapshot in Prometheus text exposition format
    pub fn export_prometheus(metrics: &ServiceMetrics) -> String {
        format!(
            r#"# HELP rolegate_checks_total Permission checks answered
# TYPE rolegate_checks_total counter
rolegate_checks_total {}

# HELP rolegate_checks_allowed_total Permission checks allowed
# TYPE rolegate_checks_allowed_total counter
rolegate_checks_allowed_total {}

# HELP rolegate_grants_total Role assignments written
# TYPE rolegate_grants_total counter
rolegate_grants_total {}

# HELP rolegate_revocations_total Role assignments deleted
# TYPE rolegate_revocations_total counter
rolegate_revocations_total {}

# HELP rolegate_rejected_total Mutations rejected by delegation rules
# TYPE rolegate_rejected_total counter
rolegate_rejected_total {}

# HELP rolegate_check_latency_seconds Permission check latency percentiles
# TYPE rolegate_check_latency_seconds summary
rolegate_check_latency_seconds{{quantile="0.5"}} {}
rolegate_check_latency_seconds{{quantile="0.9"}} {}
rolegate_check_latency_seconds{{quantile="0.99"}} {}

# HELP rolegate_errors_total Failed operations
# TYPE rolegate_errors_total counter
rolegate_errors_total {}
"#,
            metrics.total_checks,
            metrics.allowed_checks,
            metrics.grants,
            metrics.revocations,
            metrics.rejected,
            metrics.check_latency_p50_ms / 1000.0,
            metrics.check_latency_p90_ms / 1000.0,
            metrics.check_latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
