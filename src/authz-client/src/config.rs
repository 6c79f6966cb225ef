//! Client configuration
//!
//! Values are layered: explicit builder calls win over the process
//! environment, which wins over the defaults below.
//!
//! Environment variables:
//! - `AUTHZ_BASE_URL` - Authorization service address (default: http://localhost:8080)
//! - `AUTHZ_TIMEOUT_SECONDS` - Per-request timeout (default: 5)
//! - `AUTHZ_VERIFY_TLS` - Verify server certificates (default: true)
//! - `AUTHZ_CREDENTIAL_KIND` - id_token, session_token or access_token (default: id_token)
//! - `AUTHZ_SHARED_SECRET` - Optional shared secret header value
//! - `AUTHZ_SHARED_SECRET_HEADER` - Header carrying the secret (default: X-Authz-Shared-Secret)
//! - `AUTHZ_CHECK_MODE` - local or remote (default: local)
//! - `AUTHZ_CACHE_TTL_SECONDS` - Verdict cache TTL (default: 60)
//! - `AUTHZ_CACHE_CAPACITY` - Maximum cached verdicts per cache (default: 10000)
//! - `AUTHZ_RETRY_MAX_ATTEMPTS` - Attempts per load, including the first (default: 2)

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::credential::CredentialKind;
use crate::error::AuthorizationError;
use crate::resolver::retry::RetryPolicy;
use crate::types::CheckMode;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHARED_SECRET_HEADER: &str = "X-Authz-Shared-Secret";

const ENV_BASE_URL: &str = "AUTHZ_BASE_URL";
const ENV_TIMEOUT: &str = "AUTHZ_TIMEOUT_SECONDS";
const ENV_VERIFY_TLS: &str = "AUTHZ_VERIFY_TLS";
const ENV_CREDENTIAL_KIND: &str = "AUTHZ_CREDENTIAL_KIND";
const ENV_SHARED_SECRET: &str = "AUTHZ_SHARED_SECRET";
const ENV_SHARED_SECRET_HEADER: &str = "AUTHZ_SHARED_SECRET_HEADER";
const ENV_CHECK_MODE: &str = "AUTHZ_CHECK_MODE";
const ENV_CACHE_TTL: &str = "AUTHZ_CACHE_TTL_SECONDS";
const ENV_CACHE_CAPACITY: &str = "AUTHZ_CACHE_CAPACITY";
const ENV_RETRY_MAX_ATTEMPTS: &str = "AUTHZ_RETRY_MAX_ATTEMPTS";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for AuthorizationError {
    fn from(err: ConfigError) -> Self {
        AuthorizationError::Internal(err.to_string())
    }
}

/// Immutable client configuration, shared by transport and resolver
#[derive(Clone, PartialEq)]
pub struct AuthzConfig {
    base_url: String,
    timeout: Duration,
    verify_tls: bool,
    credential_kind: CredentialKind,
    shared_secret: Option<String>,
    shared_secret_header: String,
    check_mode: CheckMode,
    cache: CacheConfig,
    retry: RetryPolicy,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            verify_tls: true,
            credential_kind: CredentialKind::IdToken,
            shared_secret: None,
            shared_secret_header: DEFAULT_SHARED_SECRET_HEADER.to_string(),
            check_mode: CheckMode::Local,
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AuthzConfig {
    pub fn builder() -> AuthzConfigBuilder {
        AuthzConfigBuilder::default()
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn credential_kind(&self) -> CredentialKind {
        self.credential_kind
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.shared_secret.as_deref()
    }

    pub fn shared_secret_header(&self) -> &str {
        &self.shared_secret_header
    }

    pub fn check_mode(&self) -> CheckMode {
        self.check_mode
    }

    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl fmt::Debug for AuthzConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthzConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("verify_tls", &self.verify_tls)
            .field("credential_kind", &self.credential_kind)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("shared_secret_header", &self.shared_secret_header)
            .field("check_mode", &self.check_mode)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`AuthzConfig`]; unset fields fall back to environment, then defaults
#[derive(Debug, Clone, Default)]
pub struct AuthzConfigBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    verify_tls: Option<bool>,
    credential_kind: Option<CredentialKind>,
    shared_secret: Option<String>,
    shared_secret_header: Option<String>,
    check_mode: Option<CheckMode>,
    cache_ttl: Option<Duration>,
    cache_capacity: Option<usize>,
    retry: Option<RetryPolicy>,
}

impl AuthzConfigBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = Some(verify_tls);
        self
    }

    pub fn credential_kind(mut self, kind: CredentialKind) -> Self {
        self.credential_kind = Some(kind);
        self
    }

    pub fn shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    pub fn shared_secret_header(mut self, header: impl Into<String>) -> Self {
        self.shared_secret_header = Some(header.into());
        self
    }

    pub fn check_mode(mut self, mode: CheckMode) -> Self {
        self.check_mode = Some(mode);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build, consulting the process environment for unset values
    pub fn build(self) -> Result<AuthzConfig, ConfigError> {
        self.build_with(|key| std::env::var(key).ok())
    }

    /// Build without touching the environment
    pub fn build_without_env(self) -> Result<AuthzConfig, ConfigError> {
        self.build_with(|_| None)
    }

    /// Build, consulting `lookup` for unset values
    pub fn build_with<F>(self, lookup: F) -> Result<AuthzConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = AuthzConfig::default();

        let base_url = match self.base_url {
            Some(url) => url,
            None => env(ENV_BASE_URL).unwrap_or(defaults.base_url),
        };
        let base_url = normalize_base_url(&base_url)?;

        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => env_parse_with(&env, ENV_TIMEOUT, parse_seconds)?.unwrap_or(defaults.timeout),
        };
        if timeout.is_zero() {
            return Err(ConfigError::invalid(ENV_TIMEOUT, "0", "timeout must be positive"));
        }
        validate_duration(ENV_TIMEOUT, timeout)?;

        let verify_tls = match self.verify_tls {
            Some(verify) => verify,
            None => env_parse_with(&env, ENV_VERIFY_TLS, parse_bool)?.unwrap_or(defaults.verify_tls),
        };

        let credential_kind = match self.credential_kind {
            Some(kind) => kind,
            None => env_parse_with(&env, ENV_CREDENTIAL_KIND, CredentialKind::from_str)?
                .unwrap_or(defaults.credential_kind),
        };

        let shared_secret = self.shared_secret.or_else(|| env(ENV_SHARED_SECRET));

        let shared_secret_header = match self.shared_secret_header {
            Some(header) => header,
            None => env(ENV_SHARED_SECRET_HEADER).unwrap_or(defaults.shared_secret_header),
        };
        validate_header_name(&shared_secret_header)?;

        let check_mode = match self.check_mode {
            Some(mode) => mode,
            None => env_parse_with(&env, ENV_CHECK_MODE, CheckMode::from_str)?
                .unwrap_or(defaults.check_mode),
        };

        let ttl = match self.cache_ttl {
            Some(ttl) => ttl,
            None => env_parse_with(&env, ENV_CACHE_TTL, parse_seconds)?.unwrap_or(defaults.cache.ttl),
        };
        validate_duration(ENV_CACHE_TTL, ttl)?;

        let capacity = match self.cache_capacity {
            Some(capacity) => capacity,
            None => env_parse_with(&env, ENV_CACHE_CAPACITY, |v| {
                v.trim().parse::<usize>().map_err(|e| e.to_string())
            })?
            .unwrap_or(defaults.cache.capacity),
        };
        if capacity == 0 {
            return Err(ConfigError::invalid(
                ENV_CACHE_CAPACITY,
                "0",
                "cache capacity must be at least 1",
            ));
        }

        let retry = match self.retry {
            Some(retry) => retry,
            None => match env_parse_with(&env, ENV_RETRY_MAX_ATTEMPTS, |v| {
                v.trim().parse::<u32>().map_err(|e| e.to_string())
            })? {
                Some(max_attempts) => RetryPolicy {
                    max_attempts,
                    ..defaults.retry
                },
                None => defaults.retry,
            },
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                ENV_RETRY_MAX_ATTEMPTS,
                "0",
                "at least one attempt is required",
            ));
        }

        Ok(AuthzConfig {
            base_url,
            timeout,
            verify_tls,
            credential_kind,
            shared_secret,
            shared_secret_header,
            check_mode,
            cache: CacheConfig { capacity, ttl },
            retry,
        })
    }
}

fn env_parse_with<E, P, T>(env: &E, key: &'static str, parse: P) -> Result<Option<T>, ConfigError>
where
    E: Fn(&'static str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    match env(key) {
        Some(raw) => parse(&raw)
            .map(Some)
            .map_err(|reason| ConfigError::invalid(key, raw, reason)),
        None => Ok(None),
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::invalid(
            ENV_BASE_URL,
            raw,
            "expected an http:// or https:// address",
        ));
    }
    let host = trimmed.split_once("://").map(|(_, rest)| rest).unwrap_or_default();
    if host.is_empty() {
        return Err(ConfigError::invalid(ENV_BASE_URL, raw, "missing host"));
    }
    Ok(trimmed.to_string())
}

fn validate_header_name(name: &str) -> Result<(), ConfigError> {
    reqwest::header::HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|e| ConfigError::invalid(ENV_SHARED_SECRET_HEADER, name, e.to_string()))
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds: f64 = raw.trim().parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err("expected a non-negative number of seconds".to_string());
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())
}

/// Durations must fit both verdict timestamps and cache deadlines
fn validate_duration(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    let representable = chrono::Duration::from_std(value).is_ok()
        && Instant::now().checked_add(value).is_some();
    if !representable {
        return Err(ConfigError::invalid(
            key,
            format!("{:?}", value),
            "duration is too large",
        ));
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{}'", other)),
    }
}
