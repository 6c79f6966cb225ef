//! Resolver counters for operator dashboards and alerting
//!
//! `Unauthenticated` and `Forbidden` are expected traffic; the infrastructure
//! counters (`upstream_unavailable`, `invalid_responses`, `internal_errors`)
//! are the ones worth paging on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{AuthorizationError, ErrorKind};

/// Point-in-time view of resolver activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverMetrics {
    /// Total `resolve` and `check` calls
    pub total_requests: u64,

    /// Requests sent to the authorization service, retries included
    pub transport_calls: u64,

    /// Retries after transient failures
    pub retries: u64,

    /// Checks that ended in `Allowed`
    pub allowed_decisions: u64,

    /// Per-kind error counts as seen by callers
    pub unauthenticated: u64,
    pub forbidden: u64,
    pub upstream_unavailable: u64,
    pub invalid_responses: u64,
    pub internal_errors: u64,

    /// Average latency of remote loads
    pub avg_load_latency_ms: f64,

    /// Slowest remote load observed
    pub max_load_latency_ms: f64,
}

impl ResolverMetrics {
    /// Failures caused by infrastructure rather than by the caller
    pub fn infrastructure_errors(&self) -> u64 {
        self.upstream_unavailable + self.invalid_responses + self.internal_errors
    }

    /// Share of requests that failed for infrastructure reasons
    pub fn infrastructure_error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.infrastructure_errors() as f64 / self.total_requests as f64
        }
    }
}

/// Lock-free metrics collector shared by the resolver and its loads
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    transport_calls: AtomicU64,
    retries: AtomicU64,
    allowed_decisions: AtomicU64,
    unauthenticated: AtomicU64,
    forbidden: AtomicU64,
    upstream_unavailable: AtomicU64,
    invalid_responses: AtomicU64,
    internal_errors: AtomicU64,
    loads: AtomicU64,
    load_latency_micros: AtomicU64,
    max_load_latency_micros: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_call(&self) {
        self.transport_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allowed(&self) {
        self.allowed_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: &AuthorizationError) {
        let counter = match error.kind() {
            ErrorKind::Unauthenticated => &self.unauthenticated,
            ErrorKind::Forbidden => &self.forbidden,
            ErrorKind::UpstreamUnavailable => &self.upstream_unavailable,
            ErrorKind::InvalidResponse => &self.invalid_responses,
            ErrorKind::Internal => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of one remote load, retries included
    pub fn record_load_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.load_latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_load_latency_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Snapshot current counters
    pub fn get_metrics(&self) -> ResolverMetrics {
        let loads = self.loads.load(Ordering::Relaxed);
        let total_micros = self.load_latency_micros.load(Ordering::Relaxed);
        let avg_load_latency_ms = if loads == 0 {
            0.0
        } else {
            total_micros as f64 / loads as f64 / 1000.0
        };

        ResolverMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            transport_calls: self.transport_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            allowed_decisions: self.allowed_decisions.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            forbidden: self.forbidden.load(Ordering::Relaxed),
            upstream_unavailable: self.upstream_unavailable.load(Ordering::Relaxed),
            invalid_responses: self.invalid_responses.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            avg_load_latency_ms,
            max_load_latency_ms: self.max_load_latency_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.get_metrics(), ResolverMetrics::default());
    }

    #[test]
    fn test_error_counters_by_kind() {
        let collector = MetricsCollector::new();
        for _ in 0..4 {
            collector.record_request();
        }
        collector.record_error(&AuthorizationError::Unauthenticated("x".into()));
        collector.record_error(&AuthorizationError::Forbidden("x".into()));
        collector.record_error(&AuthorizationError::UpstreamUnavailable("x".into()));
        collector.record_error(&AuthorizationError::InvalidResponse("x".into()));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.unauthenticated, 1);
        assert_eq!(metrics.forbidden, 1);
        assert_eq!(metrics.infrastructure_errors(), 2);
        assert!((metrics.infrastructure_error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_latency() {
        let collector = MetricsCollector::new();
        collector.record_load_latency(Duration::from_millis(10));
        collector.record_load_latency(Duration::from_millis(30));

        let metrics = collector.get_metrics();
        assert!((metrics.avg_load_latency_ms - 20.0).abs() < 1e-9);
        assert!((metrics.max_load_latency_ms - 30.0).abs() < 1e-9);
    }
}
