//! Error taxonomy for catalog reconciliation.
//!
//! Network failures carry a sub-kind plus actionable suggestions so callers
//! can surface "check the server URL" style hints next to the raw message.
//! `Error::is_retryable` is what the fetch retry loop consults: auth,
//! validation and not-found errors fail fast because retrying cannot fix them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kind for network-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The request exceeded its per-attempt deadline.
    Timeout { timeout_ms: u64 },
    ConnectionRefused,
    DnsFailure,
    ConnectionReset,
    Other(String),
}

impl NetworkError {
    /// Operator-facing hints for this failure class.
    #[must_use]
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::Timeout { .. } => &[
                "the channel may be slow; retry the channel individually",
                "increase the per-attempt timeout in the fetch policy",
            ],
            Self::ConnectionRefused => &[
                "check that the server URL and port are correct",
                "check that the relay server is running",
            ],
            Self::DnsFailure => &["check the server hostname for typos"],
            Self::ConnectionReset => &["the connection dropped mid-request; retry"],
            Self::Other(_) => &[],
        }
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => write!(f, "timed out after {timeout_ms}ms"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::DnsFailure => write!(f, "DNS lookup failed"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(NetworkError),

    /// 401-class failures. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 5xx-class failures from the relay server.
    #[error("server error: {0}")]
    Server(String),

    /// 404-class failures, e.g. a channel that no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// A raw model name with no provenance record. Always a bug signal:
    /// there is no free-text model entry path, so every name must trace
    /// back to a channel or search selection.
    #[error("provenance anomaly: {0}")]
    Provenance(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn network(kind: NetworkError) -> Self {
        Self::Network(kind)
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Network(NetworkError::Timeout { timeout_ms })
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provenance(msg: impl Into<String>) -> Self {
        Self::Provenance(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether the fetch loop should retry after this error.
    ///
    /// Network-class failures (including server 5xx) are transient; auth,
    /// not-found and malformed-response errors are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server(_))
    }

    /// Actionable hints for the operator, when the error class has any.
    #[must_use]
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::Network(kind) => kind.suggestions(),
            Self::Auth(_) => &["check the access token and user id"],
            _ => &[],
        }
    }
}
