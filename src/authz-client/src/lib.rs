//! # CretoAI Authorization Client
//!
//! Resolves "who is this caller and what may they do" by delegating to a
//! remote authorization service, without validating tokens locally.
//!
//! ## Features
//!
//! - **Typed credentials**: exactly one of `id_token`, `session_token` or `access_token` per request
//! - **Single-flight caching**: one in-flight request per credential, shared by all concurrent callers
//! - **Negative caching**: `Unauthenticated`/`Forbidden` verdicts are cached, infrastructure failures are not
//! - **Bounded retries** with exponential backoff for network and 5xx failures
//! - **Closed error taxonomy** that host frameworks map to 401/403/5xx
//! - **Async and blocking** entry points over the same cache
//!
//! ## Example
//!
//! ```rust,no_run
//! use cretoai_authz_client::{AuthzConfig, AuthorizationError, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AuthorizationError> {
//!     let config = AuthzConfig::builder()
//!         .base_url("https://authz.internal")
//!         .build()?;
//!     let resolver = Resolver::new(config)?;
//!
//!     let credential = resolver.credential("eyJhbGciOi...")?;
//!     let auth = resolver.resolve(&credential).await?;
//!     println!("caller: {}", auth.subject());
//!
//!     match resolver.check(&credential, "inventory:read").await {
//!         Ok(_) => println!("Access granted!"),
//!         Err(err) => println!("denied with status {}", err.kind().http_status()),
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credential;
pub mod error;
pub mod mapper;
pub mod metrics;
pub mod resolver;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats};
pub use config::{AuthzConfig, AuthzConfigBuilder, ConfigError};
pub use credential::{Credential, CredentialKind, Fingerprint};
pub use error::{AuthorizationError, ErrorKind, Result};
pub use metrics::ResolverMetrics;
pub use resolver::{BlockingResolver, Resolver, RetryPolicy};
pub use transport::{Endpoint, HttpTransport, RawResponse, RequestPayload, Transport, TransportFailure};
pub use types::{Allowed, CheckMode, EffectiveAuthorization};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
