//! Unified error taxonomy for the ProSBC Integration Core.
//!
//! One flat enum rather than per-component error types: every component
//! (C1-C6) ultimately returns one of these kinds to its caller, as mandated
//! by the specification's error taxonomy (never a bare string).

use std::fmt;

/// Errors returned by every public core operation.
#[derive(Debug)]
pub enum CoreError {
    /// The named appliance, configuration, or file does not exist.
    NotFound(String),
    /// Credentials were rejected by the remote appliance.
    AuthFailed(String),
    /// A call observed a login-page body mid-session.
    SessionExpired(String),
    /// The §4.3 validation probe (and 1..N dbId probe) was exhausted.
    ConfigSelectionFailed(String),
    /// The remote reported "Name has already been taken".
    Conflict(String),
    /// The remote reported success but post-upload verification mismatched.
    VerificationFailed(String),
    /// Network error: DNS, connect, reset.
    UpstreamUnavailable(String),
    /// Unexpected redirect chain or HTML shape.
    ProtocolError(String),
    /// The caller-supplied deadline was exceeded.
    Timeout(String),
    /// Catch-all for a non-2xx/3xx response, with a bounded, redacted snippet.
    UpstreamError { status: Option<u16>, snippet: String },
}

impl CoreError {
    /// Appliance-facing error-kind tag, stable across crate versions, used
    /// by callers that serialize `CoreError` without depending on its enum
    /// shape (e.g. the HTTP router's JSON error envelope).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AuthFailed(_) => "auth_failed",
            Self::SessionExpired(_) => "session_expired",
            Self::ConfigSelectionFailed(_) => "config_selection_failed",
            Self::Conflict(_) => "conflict",
            Self::VerificationFailed(_) => "verification_failed",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::ProtocolError(_) => "protocol_error",
            Self::Timeout(_) => "timeout",
            Self::UpstreamError { .. } => "upstream_error",
        }
    }

    /// Build an `UpstreamError` with an already-bounded, redacted snippet.
    pub fn upstream(status: Option<u16>, snippet: impl Into<String>) -> Self {
        Self::UpstreamError {
            status,
            snippet: snippet.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::SessionExpired(msg) => write!(f, "session expired: {msg}"),
            Self::ConfigSelectionFailed(msg) => write!(f, "config selection failed: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::VerificationFailed(msg) => write!(f, "verification failed: {msg}"),
            Self::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            Self::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::UpstreamError { status, snippet } => match status {
                Some(code) => write!(f, "upstream error (status {code}): {snippet}"),
                None => write!(f, "upstream error: {snippet}"),
            },
        }
    }
}

impl std::error::Error for CoreError {}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::UpstreamUnavailable(err.to_string())
        }
    }
}

/// Fan-out error category (§4.6), derived from [`CoreError`] by substring
/// matching on the offending appliance's error text. Kept intentionally
/// separate from [`CoreError`] because the classification rule is
/// load-bearing documentation, not just an implementation detail: the exact
/// substrings below are part of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutErrorKind {
    Connection,
    Authentication,
    Initialization,
    Timeout,
    Unknown,
}

impl FanoutErrorKind {
    /// Classify an error's displayed text per the documented substring rules.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("socket hang up")
            || lower.contains("econnrefused")
            || lower.contains("failed to fetch")
        {
            Self::Connection
        } else if lower.contains("authenticity_token") || lower.contains("login page") {
            Self::Authentication
        } else if lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("before initialization") || lower.contains("hasroutesetsection") {
            Self::Initialization
        } else {
            Self::Unknown
        }
    }

    /// Stable lowercase tag matching the spec's glossary naming.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Initialization => "initialization",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&CoreError> for FanoutErrorKind {
    fn from(err: &CoreError) -> Self {
        Self::classify(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            CoreError::upstream(Some(500), "boom".to_string()).kind(),
            "upstream_error"
        );
    }

    #[test]
    fn upstream_error_display_includes_status() {
        let err = CoreError::upstream(Some(502), "bad gateway".to_string());
        assert_eq!(err.to_string(), "upstream error (status 502): bad gateway");
    }

    #[test]
    fn fanout_classification_connection() {
        assert_eq!(
            FanoutErrorKind::classify("Error: socket hang up"),
            FanoutErrorKind::Connection
        );
        assert_eq!(
            FanoutErrorKind::classify("connect ECONNREFUSED 10.0.0.1:443"),
            FanoutErrorKind::Connection
        );
    }

    #[test]
    fn fanout_classification_authentication() {
        assert_eq!(
            FanoutErrorKind::classify("missing authenticity_token in form"),
            FanoutErrorKind::Authentication
        );
        assert_eq!(
            FanoutErrorKind::classify("redirected to login page"),
            FanoutErrorKind::Authentication
        );
    }

    #[test]
    fn fanout_classification_timeout_and_init() {
        assert_eq!(
            FanoutErrorKind::classify("request timeout after 30s"),
            FanoutErrorKind::Timeout
        );
        assert_eq!(
            FanoutErrorKind::classify("called hasRoutesetSection before initialization"),
            FanoutErrorKind::Initialization
        );
    }

    #[test]
    fn fanout_classification_falls_back_to_unknown() {
        assert_eq!(
            FanoutErrorKind::classify("something unexpected happened"),
            FanoutErrorKind::Unknown
        );
    }
}
