//! Error types for tcp-unix-proxy
//!
//! Only setup failures surface here. Per-connection failures (target refused,
//! peer reset mid-stream) end the affected pair and are logged, never returned.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for proxy operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Errors reported synchronously by the relay engine
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Invalid configuration, including a target socket path that does not exist
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable description
        message: String,
        /// Name of the offending setting, if known
        key: Option<String>,
    },

    /// The listen address could not be resolved or bound
    #[error("Failed to bind listener to {addr}: {source}")]
    Bind {
        /// Requested `host:port`
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// `start` was called while the accept loop is already running
    #[error("Proxy is already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Create a configuration error naming the offending setting
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a bind error for `addr`
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Whether the error stems from configuration rather than the environment
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
