//! Authorization resolver
//!
//! Orchestrates credential fingerprinting, the single-flight verdict cache,
//! transport retries and error classification.
//!
//! # Architecture
//!
//! ```text
//! resolve(credential) → fingerprint → Cache ──hit──────────────────────→ verdict
//!                                       │ miss (one load per key)
//!                                       ↓
//!                              Transport (+ retry) → Mapper → Cache → verdict
//! ```

pub mod blocking;
pub mod retry;

pub use blocking::BlockingResolver;
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, SingleFlightCache};
use crate::config::AuthzConfig;
use crate::credential::Credential;
use crate::error::{AuthorizationError, Result};
use crate::mapper::{check_membership, classify_failure, decode_authorization, decode_check};
use crate::metrics::{MetricsCollector, ResolverMetrics};
use crate::transport::{Endpoint, HttpTransport, RawResponse, RequestPayload, Transport};
use crate::types::{Allowed, CheckMode, EffectiveAuthorization};

/// Resolves credentials into authorization verdicts via the remote service
///
/// Construct one per application and pass it to every call site; clones
/// share the same cache, connection pool and metrics.
#[derive(Clone)]
pub struct Resolver {
    /// Immutable client configuration
    config: Arc<AuthzConfig>,

    /// Transport to the authorization service
    transport: Arc<dyn Transport>,

    /// `/authz` verdicts keyed by credential fingerprint
    authorizations: SingleFlightCache<EffectiveAuthorization>,

    /// `/authz/check` verdicts keyed by credential + permission
    checks: SingleFlightCache<Allowed>,

    /// Metrics collector
    metrics: Arc<MetricsCollector>,
}

impl Resolver {
    /// Create a resolver talking HTTP to the configured service
    pub fn new(config: AuthzConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a resolver configured from defaults and the process environment
    pub fn from_env() -> Result<Self> {
        Self::new(AuthzConfig::from_env()?)
    }

    /// Create a resolver over an arbitrary transport
    pub fn with_transport(config: AuthzConfig, transport: Arc<dyn Transport>) -> Self {
        info!(
            "Resolver initialized: base_url={}, credential_kind={}, check_mode={}, cache_ttl={:?}, max_attempts={}",
            config.base_url(),
            config.credential_kind(),
            config.check_mode(),
            config.cache().ttl,
            config.retry().max_attempts
        );

        Self {
            authorizations: SingleFlightCache::new(config.cache().clone()),
            checks: SingleFlightCache::new(config.cache().clone()),
            config: Arc::new(config),
            transport,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// Wrap a raw bearer value as a credential of the configured kind
    pub fn credential(&self, value: impl Into<String>) -> Result<Credential> {
        Credential::new(self.config.credential_kind(), value)
    }

    /// Resolve the effective authorization for `credential`
    ///
    /// At most one request per distinct credential is in flight at a time;
    /// settled verdicts, including `Unauthenticated` and `Forbidden`, are
    /// served from cache until their TTL passes.
    pub async fn resolve(&self, credential: &Credential) -> Result<Arc<EffectiveAuthorization>> {
        self.metrics.record_request();
        let result = self.resolve_cached(credential).await;
        if let Err(err) = &result {
            self.metrics.record_error(err);
        }
        result
    }

    /// Check that `credential` holds `permission`
    ///
    /// Uses local set membership or the remote check endpoint depending on
    /// the configured [`CheckMode`]. Resolution errors propagate unchanged.
    pub async fn check(&self, credential: &Credential, permission: &str) -> Result<Allowed> {
        self.metrics.record_request();
        let result = self.check_one(credential, permission).await;
        self.record_check(&result);
        result
    }

    /// Allowed if any of `permissions` is held; an empty list is forbidden
    pub async fn check_any(&self, credential: &Credential, permissions: &[&str]) -> Result<Allowed> {
        self.metrics.record_request();
        let result = self.check_first_allowed(credential, permissions).await;
        self.record_check(&result);
        result
    }

    /// Allowed only if every one of `permissions` is held
    pub async fn check_all(
        &self,
        credential: &Credential,
        permissions: &[&str],
    ) -> Result<Vec<Allowed>> {
        self.metrics.record_request();
        let mut granted = Vec::with_capacity(permissions.len());
        for permission in permissions {
            match self.check_one(credential, permission).await {
                Ok(allowed) => granted.push(allowed),
                Err(err) => {
                    self.metrics.record_error(&err);
                    return Err(err);
                }
            }
        }
        self.metrics.record_allowed();
        Ok(granted)
    }

    /// Evict the cached `/authz` verdict for `credential`
    ///
    /// This covers `resolve` and every `check` in [`CheckMode::Local`].
    /// Remote check verdicts are cached per permission; evict those with
    /// [`invalidate_check`](Self::invalidate_check) or [`clear_cache`](Self::clear_cache).
    pub fn invalidate(&self, credential: &Credential) -> bool {
        let removed = self.authorizations.invalidate(&credential.fingerprint());
        if removed {
            debug!("Invalidated cached verdict for {}", credential.fingerprint());
        }
        removed
    }

    /// Evict the cached `/authz/check` verdict for one permission
    pub fn invalidate_check(&self, credential: &Credential, permission: &str) -> bool {
        let removed = self.checks.invalidate(&credential.fingerprint_with(permission));
        if removed {
            debug!(
                "Invalidated cached check of '{}' for {}",
                permission,
                credential.fingerprint()
            );
        }
        removed
    }

    /// Drop every cached verdict
    pub fn clear_cache(&self) {
        self.authorizations.clear();
        self.checks.clear();
        info!("Verdict caches cleared");
    }

    /// Get resolver metrics
    pub fn metrics(&self) -> ResolverMetrics {
        self.metrics.get_metrics()
    }

    /// Statistics of the `/authz` verdict cache
    pub fn cache_stats(&self) -> CacheStats {
        self.authorizations.stats()
    }

    /// Statistics of the `/authz/check` verdict cache
    pub fn check_cache_stats(&self) -> CacheStats {
        self.checks.stats()
    }

    async fn resolve_cached(&self, credential: &Credential) -> Result<Arc<EffectiveAuthorization>> {
        let key = credential.fingerprint();
        let payload = RequestPayload::resolve(credential);
        let load = self.load_context();

        self.authorizations
            .get_or_load(key, move || async move {
                let response = load.send(Endpoint::Resolve, &payload).await?;
                let auth = decode_authorization(&response, load.config.cache().ttl)
                    .map_err(|err| load.log_failure(Endpoint::Resolve, err))?;
                debug!(
                    "Resolved {} with {} permissions",
                    auth.subject(),
                    auth.permissions().len()
                );
                Ok(Arc::new(auth))
            })
            .await
    }

    async fn check_one(&self, credential: &Credential, permission: &str) -> Result<Allowed> {
        match self.config.check_mode() {
            CheckMode::Local => {
                let auth = self.resolve_cached(credential).await?;
                check_membership(&auth, permission)
            }
            CheckMode::Remote => self.check_remote(credential, permission).await,
        }
    }

    async fn check_remote(&self, credential: &Credential, permission: &str) -> Result<Allowed> {
        let key = credential.fingerprint_with(permission);
        let payload = RequestPayload::check(credential, permission);
        let permission = permission.to_string();
        let load = self.load_context();

        let allowed = self
            .checks
            .get_or_load(key, move || async move {
                let response = load.send(Endpoint::Check, &payload).await?;
                decode_check(&response, &permission)
                    .map(Arc::new)
                    .map_err(|err| load.log_failure(Endpoint::Check, err))
            })
            .await?;

        Ok(allowed.as_ref().clone())
    }

    async fn check_first_allowed(
        &self,
        credential: &Credential,
        permissions: &[&str],
    ) -> Result<Allowed> {
        let mut last_denial = None;
        for permission in permissions {
            match self.check_one(credential, permission).await {
                Ok(allowed) => return Ok(allowed),
                Err(AuthorizationError::Forbidden(reason)) => {
                    last_denial = Some(AuthorizationError::Forbidden(reason));
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_denial.unwrap_or_else(|| {
            AuthorizationError::Forbidden("no permissions requested".to_string())
        }))
    }

    fn record_check(&self, result: &Result<Allowed>) {
        match result {
            Ok(_) => self.metrics.record_allowed(),
            Err(err) => self.metrics.record_error(err),
        }
    }

    fn load_context(&self) -> LoadContext {
        LoadContext {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Everything a detached load needs, owned so it can outlive the caller
struct LoadContext {
    config: Arc<AuthzConfig>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsCollector>,
}

impl LoadContext {
    async fn send(&self, endpoint: Endpoint, payload: &RequestPayload) -> Result<RawResponse> {
        let start = Instant::now();
        let outcome = retry::send_with_retry(
            self.transport.as_ref(),
            endpoint,
            payload,
            self.config.timeout(),
            self.config.retry(),
            &self.metrics,
        )
        .await;
        self.metrics.record_load_latency(start.elapsed());

        outcome.map_err(|failure| self.log_failure(endpoint, classify_failure(endpoint, &failure)))
    }

    fn log_failure(&self, endpoint: Endpoint, err: AuthorizationError) -> AuthorizationError {
        if err.kind().is_infrastructure() {
            warn!("{} failed: {}", endpoint.path(), err);
        } else {
            debug!("{} verdict: {}", endpoint.path(), err);
        }
        err
    }
}
