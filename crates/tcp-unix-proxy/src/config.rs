//! Relay configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Default host the listener binds to
pub const DEFAULT_LISTEN_HOST: &str = "localhost";

/// Default size of each copy loop's read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default target socket, the Docker engine control socket
pub const DEFAULT_TARGET_SOCKET: &str = "/var/run/docker.sock";

/// Configuration for a [`TcpUnixProxy`](crate::TcpUnixProxy)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Hostname or IP address to listen on
    pub listen_host: String,

    /// Port to listen on; 0 lets the OS pick a free port
    pub listen_port: u16,

    /// Unix domain socket every inbound connection is relayed to
    pub target_socket_path: PathBuf,

    /// Read buffer size per copy direction, in bytes
    pub buffer_size: usize,

    /// Maximum number of live pairs; `None` means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: 0,
            target_socket_path: PathBuf::from(DEFAULT_TARGET_SOCKET),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: None,
        }
    }
}

impl ProxyConfig {
    /// Listen on `localhost` with an ephemeral port and relay to `target_socket_path`
    pub fn new(target_socket_path: impl Into<PathBuf>) -> Self {
        Self {
            target_socket_path: target_socket_path.into(),
            ..Self::default()
        }
    }

    /// Set the listen host
    #[must_use]
    pub fn listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    /// Set the listen port
    #[must_use]
    pub const fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Set the per-direction read buffer size
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Cap the number of concurrently relayed pairs
    #[must_use]
    pub const fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = Some(limit);
        self
    }

    /// The `host:port` string handed to the resolver at bind time
    pub fn listen_addr(&self) -> String {
        // Bare IPv6 literals need brackets to survive the host:port split
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// The target socket path
    pub fn target(&self) -> &Path {
        &self.target_socket_path
    }

    /// Check the configuration before the engine is built
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the target socket does not exist,
    /// the host is empty, the buffer size is zero, or the connection limit is zero.
    pub fn validate(&self) -> ProxyResult<()> {
        if self.listen_host.trim().is_empty() {
            return Err(ProxyError::configuration_with_key(
                "listen host must not be empty",
                "listen_host",
            ));
        }
        if self.buffer_size == 0 {
            return Err(ProxyError::configuration_with_key(
                "buffer size must be greater than zero",
                "buffer_size",
            ));
        }
        if self.max_connections == Some(0) {
            return Err(ProxyError::configuration_with_key(
                "connection limit must be greater than zero",
                "max_connections",
            ));
        }
        if !self.target_socket_path.exists() {
            return Err(ProxyError::configuration_with_key(
                format!(
                    "Socket file does not exist: {}",
                    self.target_socket_path.display()
                ),
                "target_socket_path",
            ));
        }
        Ok(())
    }
}
