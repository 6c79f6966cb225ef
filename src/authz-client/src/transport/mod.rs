//! Transport to the remote authorization service
//!
//! The transport only moves bytes: it never retries and never interprets the
//! response schema. Retry policy lives in the resolver, classification in the
//! mapper.

pub mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::Duration;
use thiserror::Error;

use crate::credential::{Credential, CredentialKind};

/// Fixed endpoints exposed by the authorization service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST /authz`: subject and permission set
    Resolve,

    /// `POST /authz/check`: allow/deny for a single permission
    Check,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Resolve => "/authz",
            Endpoint::Check => "/authz/check",
        }
    }
}

/// Request body: exactly one credential field, plus `permission` for checks
#[derive(Clone, PartialEq, Eq)]
pub struct RequestPayload {
    kind: CredentialKind,
    token: String,
    permission: Option<String>,
}

impl RequestPayload {
    pub fn resolve(credential: &Credential) -> Self {
        Self {
            kind: credential.kind(),
            token: credential.expose().to_string(),
            permission: None,
        }
    }

    pub fn check(credential: &Credential, permission: impl Into<String>) -> Self {
        Self {
            kind: credential.kind(),
            token: credential.expose().to_string(),
            permission: Some(permission.into()),
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }
}

impl Serialize for RequestPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.permission.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(self.kind.field_name(), &self.token)?;
        if let Some(permission) = &self.permission {
            map.serialize_entry("permission", permission)?;
        }
        map.end()
    }
}

impl std::fmt::Debug for RequestPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPayload")
            .field("kind", &self.kind)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

/// Successful (2xx) response with a JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RawResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

/// Transport-level failure, before classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    /// Connection refused, DNS failure, reset, or timeout
    #[error("network failure{}: {message}", timeout_suffix(.timed_out))]
    Network { message: String, timed_out: bool },

    /// Non-2xx status from the service
    #[error("unexpected status {code}")]
    Status { code: u16, body: Option<String> },

    /// Body was not valid JSON
    #[error("undecodable response body: {0}")]
    Decode(String),
}

impl TransportFailure {
    pub fn network(message: impl Into<String>) -> Self {
        TransportFailure::Network {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        TransportFailure::Network {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn status(code: u16) -> Self {
        TransportFailure::Status { code, body: None }
    }

    /// Network failures and 5xx responses are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            TransportFailure::Network { .. } => true,
            TransportFailure::Status { code, .. } => (500..600).contains(code),
            TransportFailure::Decode(_) => false,
        }
    }
}

fn timeout_suffix(timed_out: &bool) -> &'static str {
    if *timed_out {
        " (timeout)"
    } else {
        ""
    }
}

/// Sends one request to the authorization service
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: Endpoint,
        payload: &RequestPayload,
        timeout: Duration,
    ) -> Result<RawResponse, TransportFailure>;
}
