use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure class reported by a [`Transport`](crate::Transport) when no response was produced.
///
/// The kind doubles as the dispatch identifier for transport failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Reset,
    Read,
    Timeout,
    Tls,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Reset => "reset",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("http transport error ({kind}): {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    transient: bool,
    #[source]
    source: BoxError,
}

impl TransportError {
    /// Builds a transport error. Dns, connect, reset, read and timeout failures
    /// are considered transient; use [`TransportError::transient`] to override.
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            transient: matches!(
                kind,
                TransportErrorKind::Dns
                    | TransportErrorKind::Connect
                    | TransportErrorKind::Reset
                    | TransportErrorKind::Read
                    | TransportErrorKind::Timeout
            ),
            source: source.into(),
        }
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// String identifier of the failure class, e.g. `"timeout"`.
    pub fn code(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    MaxRetriesReached,
    Transport,
    Deserialize,
    Cache,
    InvalidRedirectLocation,
    Cancelled,
    InvalidConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxRetriesReached => "max_retries_reached",
            Self::Transport => "transport",
            Self::Deserialize => "deserialize",
            Self::Cache => "cache",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{url},{method}: Max retry count reached ({max_retries})")]
    MaxRetriesReached {
        url: String,
        method: Method,
        max_retries: usize,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("response cache error: {source}")]
    Cache {
        #[source]
        source: BoxError,
    },
    #[error("invalid redirect location {location} for {method} {url}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        url: String,
    },
    #[error("request cancelled for {method} {url}")]
    Cancelled { method: Method, url: String },
    #[error("invalid executor configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MaxRetriesReached { .. } => ErrorCode::MaxRetriesReached,
            Self::Transport(_) => ErrorCode::Transport,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Cache { .. } => ErrorCode::Cache,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    pub(crate) fn cache(source: impl Into<BoxError>) -> Self {
        Self::Cache {
            source: source.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
