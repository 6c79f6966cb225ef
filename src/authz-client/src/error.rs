//! Error types for authorization resolution

use thiserror::Error;

/// Authorization resolution errors
///
/// This is the only error type the resolver hands back to callers. Transport
/// failures are classified into one of these kinds before they leave the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// Missing, empty, ambiguous or rejected credential
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credential is valid but lacks the requested permission
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Remote service unreachable, timed out, or failing with 5xx
    #[error("Authorization service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Remote service answered with a body we cannot interpret
    #[error("Invalid response from authorization service: {0}")]
    InvalidResponse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`AuthorizationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    UpstreamUnavailable,
    InvalidResponse,
    Internal,
}

impl ErrorKind {
    /// Conventional HTTP status a host framework would answer with
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::UpstreamUnavailable => 503,
            ErrorKind::InvalidResponse => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// True for failures operators should alert on, as opposed to expected denials
    pub fn is_infrastructure(self) -> bool {
        !matches!(self, ErrorKind::Unauthenticated | ErrorKind::Forbidden)
    }
}

impl AuthorizationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthorizationError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AuthorizationError::Forbidden(_) => ErrorKind::Forbidden,
            AuthorizationError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            AuthorizationError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            AuthorizationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Negative verdicts from a well-formed remote answer may be cached;
    /// infrastructure failures must not be.
    pub fn is_cacheable(&self) -> bool {
        !self.kind().is_infrastructure()
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthorizationError>;
