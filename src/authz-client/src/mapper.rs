//! Classification of transport outcomes into authorization results
//!
//! | Outcome                                      | Error kind          |
//! |----------------------------------------------|---------------------|
//! | 401, missing or ambiguous credential         | Unauthenticated     |
//! | 403, permission absent, `allowed: false`     | Forbidden           |
//! | network failure, timeout, 5xx after retries  | UpstreamUnavailable |
//! | non-JSON or schema-violating body            | InvalidResponse     |
//! | anything else                                | Internal            |
//!
//! The same table applies to `/authz` and `/authz/check`.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{AuthorizationError, Result};
use crate::transport::{Endpoint, RawResponse, TransportFailure};
use crate::types::{split_permission, Allowed, EffectiveAuthorization, PERMISSION_SEPARATOR};

/// Map a transport failure (after retries) to an authorization error
pub fn classify_failure(endpoint: Endpoint, failure: &TransportFailure) -> AuthorizationError {
    let path = endpoint.path();
    match failure {
        TransportFailure::Status { code: 401, .. } => AuthorizationError::Unauthenticated(
            format!("{} rejected the credential", path),
        ),
        TransportFailure::Status { code: 403, .. } => {
            AuthorizationError::Forbidden(format!("{} denied access", path))
        }
        TransportFailure::Status { code, .. } if (500..600).contains(code) => {
            AuthorizationError::UpstreamUnavailable(format!("{} answered {}", path, code))
        }
        TransportFailure::Status { code, body } => AuthorizationError::Internal(format!(
            "{} answered unexpected status {}{}",
            path,
            code,
            body.as_deref()
                .map(|b| format!(": {}", b))
                .unwrap_or_default()
        )),
        TransportFailure::Network { .. } => {
            AuthorizationError::UpstreamUnavailable(format!("{}: {}", path, failure))
        }
        TransportFailure::Decode(reason) => {
            AuthorizationError::InvalidResponse(format!("{}: {}", path, reason))
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthzBody {
    subject: Option<String>,
    user: Option<String>,
    permissions: Option<PermissionsField>,
    issued_at: Option<Timestamp>,
    expires_at: Option<Timestamp>,
}

/// `["module:action", ...]` or `{"module": ["action", ...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PermissionsField {
    List(Vec<String>),
    Modules(BTreeMap<String, ModuleActions>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModuleActions {
    Many(Vec<String>),
    One(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Epoch(i64),
    Rfc3339(DateTime<Utc>),
}

impl Timestamp {
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Epoch(seconds) => Utc.timestamp_opt(seconds, 0).single(),
            Timestamp::Rfc3339(at) => Some(at),
        }
    }
}

impl PermissionsField {
    fn into_permissions(self) -> Vec<String> {
        match self {
            PermissionsField::List(list) => list,
            PermissionsField::Modules(modules) => modules
                .into_iter()
                .flat_map(|(module, actions)| {
                    let actions = match actions {
                        ModuleActions::Many(many) => many,
                        ModuleActions::One(one) => vec![one],
                    };
                    actions
                        .into_iter()
                        .map(move |action| format!("{}{}{}", module, PERMISSION_SEPARATOR, action))
                })
                .collect(),
        }
    }
}

/// Decode a `/authz` response into an [`EffectiveAuthorization`]
///
/// Missing timestamps default to now and now + `ttl`.
pub fn decode_authorization(response: &RawResponse, ttl: Duration) -> Result<EffectiveAuthorization> {
    ensure_success(Endpoint::Resolve, response)?;

    let body: AuthzBody = serde_json::from_value(response.body.clone()).map_err(|e| {
        AuthorizationError::InvalidResponse(format!("/authz body does not match schema: {}", e))
    })?;

    let subject = body.subject.or(body.user).ok_or_else(|| {
        AuthorizationError::InvalidResponse("/authz body is missing 'subject'".to_string())
    })?;
    let permissions = body.permissions.ok_or_else(|| {
        AuthorizationError::InvalidResponse("/authz body is missing 'permissions'".to_string())
    })?;

    let now = Utc::now();
    let issued_at = match body.issued_at {
        Some(at) => timestamp_field(at, "issued_at")?,
        None => now,
    };
    let expires_at = match body.expires_at {
        Some(at) => timestamp_field(at, "expires_at")?,
        None => {
            now + chrono::Duration::from_std(ttl)
                .map_err(|e| AuthorizationError::Internal(format!("cache ttl out of range: {}", e)))?
        }
    };

    Ok(EffectiveAuthorization::new(
        subject,
        permissions.into_permissions(),
        issued_at,
        expires_at,
    ))
}

fn timestamp_field(at: Timestamp, field: &str) -> Result<DateTime<Utc>> {
    at.into_datetime().ok_or_else(|| {
        AuthorizationError::InvalidResponse(format!("/authz '{}' is out of range", field))
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CheckBody {
    Bare(bool),
    Verdict {
        allowed: bool,
        // null is read as an empty list
        #[serde(default)]
        permitted_actions: Option<Vec<String>>,
    },
}

/// Decode a `/authz/check` response; a deny verdict becomes `Forbidden`
pub fn decode_check(response: &RawResponse, permission: &str) -> Result<Allowed> {
    ensure_success(Endpoint::Check, response)?;

    let body: CheckBody = serde_json::from_value(response.body.clone()).map_err(|e| {
        AuthorizationError::InvalidResponse(format!(
            "/authz/check body does not match schema: {}",
            e
        ))
    })?;

    let (allowed, permitted_actions) = match body {
        CheckBody::Bare(allowed) => (allowed, Vec::new()),
        CheckBody::Verdict {
            allowed,
            permitted_actions,
        } => (allowed, permitted_actions.unwrap_or_default()),
    };

    if allowed {
        Ok(Allowed {
            permission: permission.to_string(),
            permitted_actions,
        })
    } else {
        Err(forbidden(permission))
    }
}

/// Local set-membership check against a resolved authorization
pub fn check_membership(auth: &EffectiveAuthorization, permission: &str) -> Result<Allowed> {
    if !auth.has_permission(permission) {
        return Err(forbidden(permission));
    }

    let (module, _) = split_permission(permission);
    Ok(Allowed {
        permission: permission.to_string(),
        permitted_actions: auth.permitted_actions(module),
    })
}

pub(crate) fn forbidden(permission: &str) -> AuthorizationError {
    AuthorizationError::Forbidden(format!("permission '{}' not granted", permission))
}

fn ensure_success(endpoint: Endpoint, response: &RawResponse) -> Result<()> {
    if (200..300).contains(&response.status) {
        return Ok(());
    }
    let body = match &response.body {
        Value::Null => None,
        other => Some(other.to_string()),
    };
    Err(classify_failure(
        endpoint,
        &TransportFailure::Status {
            code: response.status,
            body,
        },
    ))
}
