//! Bearer credentials and their cache fingerprints

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{AuthorizationError, Result};

/// Kind of bearer credential forwarded to the authorization service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    IdToken,
    SessionToken,
    AccessToken,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::IdToken,
        CredentialKind::SessionToken,
        CredentialKind::AccessToken,
    ];

    /// JSON field name carrying this kind of credential on the wire
    pub fn field_name(self) -> &'static str {
        match self {
            CredentialKind::IdToken => "id_token",
            CredentialKind::SessionToken => "session_token",
            CredentialKind::AccessToken => "access_token",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        CredentialKind::ALL
            .into_iter()
            .find(|kind| kind.field_name() == normalized)
            .ok_or_else(|| {
                format!("expected one of id_token, session_token, access_token, got '{}'", s)
            })
    }
}

/// Opaque bearer credential plus its declared kind
///
/// The raw value is never printed; `Debug` shows the kind and fingerprint only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    kind: CredentialKind,
    value: String,
}

impl Credential {
    /// Create a credential, rejecting empty values
    pub fn new(kind: CredentialKind, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AuthorizationError::Unauthenticated(format!(
                "missing {} credential",
                kind
            )));
        }
        Ok(Self { kind, value })
    }

    /// Build a credential from a JSON object holding exactly one credential field
    ///
    /// Objects with none, or with more than one of `id_token`, `session_token`
    /// and `access_token`, are rejected.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self> {
        let present: Vec<(CredentialKind, &Value)> = CredentialKind::ALL
            .into_iter()
            .filter_map(|kind| {
                fields
                    .get(kind.field_name())
                    .filter(|v| !v.is_null())
                    .map(|v| (kind, v))
            })
            .collect();

        match present.as_slice() {
            [] => Err(AuthorizationError::Unauthenticated(
                "no credential field present".to_string(),
            )),
            [(kind, Value::String(value))] => Credential::new(*kind, value.as_str()),
            [(kind, _)] => Err(AuthorizationError::Unauthenticated(format!(
                "{} must be a string",
                kind
            ))),
            many => {
                let names: Vec<&str> = many.iter().map(|(k, _)| k.field_name()).collect();
                Err(AuthorizationError::Unauthenticated(format!(
                    "ambiguous credential: {} are mutually exclusive",
                    names.join(", ")
                )))
            }
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Raw bearer value. Only the transport should need this.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Stable cache key for this credential
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(*self.hasher().finalize().as_bytes())
    }

    /// Cache key for a remote permission check on this credential
    pub fn fingerprint_with(&self, permission: &str) -> Fingerprint {
        let mut hasher = self.hasher();
        hasher.update(&[0]);
        hasher.update(permission.as_bytes());
        Fingerprint(*hasher.finalize().as_bytes())
    }

    fn hasher(&self) -> Hasher {
        let mut hasher = Hasher::new();
        hasher.update(self.kind.field_name().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.value.as_bytes());
        hasher
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// BLAKE3 hash of a credential, used as the cache key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    // Short prefix, enough to correlate log lines
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test helper expects an object"),
        }
    }

    #[test]
    fn test_field_names() {
        assert_eq!(CredentialKind::IdToken.field_name(), "id_token");
        assert_eq!(CredentialKind::SessionToken.field_name(), "session_token");
        assert_eq!(CredentialKind::AccessToken.field_name(), "access_token");
        assert_eq!(CredentialKind::default(), CredentialKind::IdToken);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("session_token".parse::<CredentialKind>(), Ok(CredentialKind::SessionToken));
        assert_eq!(" ACCESS_TOKEN ".parse::<CredentialKind>(), Ok(CredentialKind::AccessToken));
        assert!("bearer".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_empty_credential_is_unauthenticated() {
        let err = Credential::new(CredentialKind::IdToken, "  ").unwrap_err();
        assert!(matches!(err, AuthorizationError::Unauthenticated(_)));
    }

    #[test]
    fn test_from_fields_single() {
        let cred = Credential::from_fields(&object(json!({"session_token": "abc"}))).unwrap();
        assert_eq!(cred.kind(), CredentialKind::SessionToken);
        assert_eq!(cred.expose(), "abc");
    }

    #[test]
    fn test_from_fields_rejects_none_and_many() {
        let none = Credential::from_fields(&object(json!({"permission": "a:b"})));
        assert!(matches!(none, Err(AuthorizationError::Unauthenticated(_))));

        let many = Credential::from_fields(&object(json!({
            "id_token": "a",
            "access_token": "b"
        })));
        match many {
            Err(AuthorizationError::Unauthenticated(msg)) => {
                assert!(msg.contains("id_token"));
                assert!(msg.contains("access_token"));
            }
            other => panic!("expected ambiguous credential error, got {:?}", other),
        }

        let wrong_type = Credential::from_fields(&object(json!({"id_token": 42})));
        assert!(matches!(wrong_type, Err(AuthorizationError::Unauthenticated(_))));
    }

    #[test]
    fn test_fingerprint_is_stable_and_kind_sensitive() {
        let a = Credential::new(CredentialKind::IdToken, "token").unwrap();
        let b = Credential::new(CredentialKind::IdToken, "token").unwrap();
        let c = Credential::new(CredentialKind::SessionToken, "token").unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), a.fingerprint_with("inventory:read"));
        assert_ne!(
            a.fingerprint_with("inventory:read"),
            a.fingerprint_with("inventory:create")
        );
    }

    #[test]
    fn test_debug_redacts_value() {
        let cred = Credential::new(CredentialKind::AccessToken, "super-secret-token").unwrap();
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("AccessToken"));
        assert_eq!(cred.fingerprint().to_string().len(), 12);
    }
}
