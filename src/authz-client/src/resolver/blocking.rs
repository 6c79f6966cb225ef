//! Blocking facade for thread-per-request hosts
//!
//! Wraps a [`Resolver`] together with a private tokio runtime. Calls from any
//! number of threads share the same cache, so single-flight coalescing holds
//! across threads exactly as it does across tasks.
//!
//! Do not call (or drop) a `BlockingResolver` from inside an async context;
//! use [`Resolver`] directly there.

use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use super::Resolver;
use crate::cache::CacheStats;
use crate::config::AuthzConfig;
use crate::credential::Credential;
use crate::error::{AuthorizationError, Result};
use crate::metrics::ResolverMetrics;
use crate::transport::Transport;
use crate::types::{Allowed, EffectiveAuthorization};

const WORKER_THREADS: usize = 2;

pub struct BlockingResolver {
    inner: Resolver,
    runtime: Runtime,
}

impl BlockingResolver {
    pub fn new(config: AuthzConfig) -> Result<Self> {
        Self::from_resolver(Resolver::new(config)?)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_resolver(Resolver::from_env()?)
    }

    pub fn with_transport(config: AuthzConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::from_resolver(Resolver::with_transport(config, transport))
    }

    pub fn from_resolver(inner: Resolver) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("authz-resolver")
            .enable_all()
            .build()
            .map_err(|e| AuthorizationError::Internal(format!("failed to start runtime: {}", e)))?;

        Ok(Self { inner, runtime })
    }

    /// Async resolver sharing this facade's cache
    pub fn resolver(&self) -> &Resolver {
        &self.inner
    }

    pub fn credential(&self, value: impl Into<String>) -> Result<Credential> {
        self.inner.credential(value)
    }

    pub fn resolve(&self, credential: &Credential) -> Result<Arc<EffectiveAuthorization>> {
        self.runtime.block_on(self.inner.resolve(credential))
    }

    pub fn check(&self, credential: &Credential, permission: &str) -> Result<Allowed> {
        self.runtime.block_on(self.inner.check(credential, permission))
    }

    pub fn check_any(&self, credential: &Credential, permissions: &[&str]) -> Result<Allowed> {
        self.runtime.block_on(self.inner.check_any(credential, permissions))
    }

    pub fn check_all(&self, credential: &Credential, permissions: &[&str]) -> Result<Vec<Allowed>> {
        self.runtime.block_on(self.inner.check_all(credential, permissions))
    }

    pub fn invalidate(&self, credential: &Credential) -> bool {
        self.inner.invalidate(credential)
    }

    pub fn invalidate_check(&self, credential: &Credential, permission: &str) -> bool {
        self.inner.invalidate_check(credential, permission)
    }

    pub fn metrics(&self) -> ResolverMetrics {
        self.inner.metrics()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache_stats()
    }
}
