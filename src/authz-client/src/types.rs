//! Core authorization result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Separator between module and action in a permission string
pub const PERMISSION_SEPARATOR: char = ':';

/// Action that grants every action within its module
pub const ANY_ACTION: &str = "*";

/// Resolved identity and permission set for a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAuthorization {
    /// Stable subject identifier
    subject: String,

    /// Granted permissions (e.g. "inventory:read")
    permissions: BTreeSet<String>,

    /// When the verdict was issued
    issued_at: DateTime<Utc>,

    /// When the verdict stops being valid
    expires_at: DateTime<Utc>,
}

impl EffectiveAuthorization {
    pub fn new(
        subject: impl Into<String>,
        permissions: impl IntoIterator<Item = String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            permissions: permissions.into_iter().collect(),
            issued_at,
            expires_at,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Whether `module:action` is granted, either directly or via `module:*`
    ///
    /// Unlike [`has_permission`](Self::has_permission), this honours the
    /// module wildcard.
    pub fn allows(&self, module: &str, action: &str) -> bool {
        [action, ANY_ACTION]
            .iter()
            .any(|a| self.has_permission(&format!("{}{}{}", module, PERMISSION_SEPARATOR, a)))
    }

    /// Actions granted within `module`
    pub fn permitted_actions(&self, module: &str) -> Vec<String> {
        self.permissions
            .iter()
            .filter_map(|p| p.split_once(PERMISSION_SEPARATOR))
            .filter(|(m, _)| *m == module)
            .map(|(_, action)| action.to_string())
            .collect()
    }
}

/// Successful permission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowed {
    /// Permission that was checked
    pub permission: String,

    /// Actions the caller holds in the permission's module
    #[serde(default)]
    pub permitted_actions: Vec<String>,
}

/// Where permission checks are enforced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Resolve once via `/authz`, then test set membership locally
    #[default]
    Local,

    /// Ask `/authz/check` for every distinct permission
    Remote,
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Local => f.write_str("local"),
            CheckMode::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for CheckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(CheckMode::Local),
            "remote" => Ok(CheckMode::Remote),
            other => Err(format!("expected 'local' or 'remote', got '{}'", other)),
        }
    }
}

/// Split `module:action`; strings without a separator are treated as a bare module
pub fn split_permission(permission: &str) -> (&str, Option<&str>) {
    match permission.split_once(PERMISSION_SEPARATOR) {
        Some((module, action)) => (module, Some(action)),
        None => (permission, None),
    }
}
