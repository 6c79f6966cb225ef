//! Retry with exponential backoff for transient transport failures

use std::time::Duration;
use tracing::warn;

use crate::metrics::MetricsCollector;
use crate::transport::{Endpoint, RawResponse, RequestPayload, Transport, TransportFailure};

/// Retry policy for a single load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Send `payload`, retrying network failures and 5xx responses up to the policy bound
pub(crate) async fn send_with_retry(
    transport: &dyn Transport,
    endpoint: Endpoint,
    payload: &RequestPayload,
    timeout: Duration,
    policy: &RetryPolicy,
    metrics: &MetricsCollector,
) -> Result<RawResponse, TransportFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        metrics.record_transport_call();
        match transport.send(endpoint, payload, timeout).await {
            Ok(response) => return Ok(response),
            Err(failure) if failure.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    endpoint.path(),
                    attempt,
                    max_attempts,
                    failure,
                    delay
                );
                metrics.record_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => return Err(failure),
        }
    }
}
