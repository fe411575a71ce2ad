//! Error types for the proxy core

use crate::http::parser::ParseError;
use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed backend address, unsupported scheme, empty backend list or
    /// an invalid setting. The proxy is never constructed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single forward against one backend failed
    #[error("backend {backend} unavailable: {source}")]
    BackendUnavailable {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// Bind or accept failure
    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),

    /// Lifecycle operation called in the wrong state
    #[error("proxy is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Graceful close of pooled idle connections failed
    #[error("failed to close idle connections for {backend}: {source}")]
    CloseIdle {
        backend: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single exchange with a backend failed
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("dial failed: {0}")]
    Dial(#[source] std::io::Error),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("no free connection within the connect timeout")]
    PoolExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timeout")]
    ReadTimeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("connection closed before complete response received")]
    ClosedEarly,

    #[error("malformed response: {0:?}")]
    Malformed(ParseError),

    #[error("backend switched protocols, which cannot be relayed")]
    Upgrade,
}

impl ProxyError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }
}
