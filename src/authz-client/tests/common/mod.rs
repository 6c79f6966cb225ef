//! Shared fixtures: a scripted in-memory transport and fast-retry configs

#![allow(dead_code)]

use async_trait::async_trait;
use cretoai_authz_client::{
    AuthzConfig, AuthzConfigBuilder, Endpoint, RawResponse, RequestPayload, RetryPolicy,
    Transport, TransportFailure,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub type Outcome = Result<RawResponse, TransportFailure>;

/// Transport that replays scripted outcomes, then repeats a fallback
pub struct ScriptedTransport {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Duration,
    requests: Mutex<Vec<(Endpoint, Value)>>,
}

impl ScriptedTransport {
    pub fn always(outcome: Outcome) -> Self {
        Self::sequence(Vec::new(), outcome)
    }

    pub fn sequence(script: Vec<Outcome>, fallback: Outcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Endpoint, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: Endpoint,
        payload: &RequestPayload,
        _timeout: Duration,
    ) -> Result<RawResponse, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((endpoint, serde_json::to_value(payload).unwrap()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn grant(subject: &str, permissions: &[&str]) -> Outcome {
    Ok(RawResponse::ok(json!({
        "subject": subject,
        "permissions": permissions,
    })))
}

pub fn status(code: u16) -> Outcome {
    Err(TransportFailure::status(code))
}

pub fn timeout() -> Outcome {
    Err(TransportFailure::timeout("operation timed out"))
}

pub fn refused() -> Outcome {
    Err(TransportFailure::network("connection refused"))
}

/// Route resolver logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Builder with quick backoff and no environment influence
pub fn fast_config() -> AuthzConfigBuilder {
    AuthzConfig::builder().retry(RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    })
}

pub fn test_config() -> AuthzConfig {
    fast_config().build_without_env().unwrap()
}
