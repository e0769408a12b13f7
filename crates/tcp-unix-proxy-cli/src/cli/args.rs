//! Argument groups for the relay command line

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tcp_unix_proxy::{DEFAULT_BUFFER_SIZE, DEFAULT_LISTEN_HOST, DEFAULT_TARGET_SOCKET, ProxyConfig};

/// Where to listen and what to relay to
#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    /// Hostname or IP address to listen on
    #[arg(long, value_name = "HOST", default_value = DEFAULT_LISTEN_HOST, env = "TCP_UNIX_PROXY_HOST")]
    pub host: String,

    /// TCP port to listen on (0 picks a free port)
    #[arg(short, long, value_name = "PORT", default_value_t = 2375, env = "TCP_UNIX_PROXY_PORT")]
    pub port: u16,

    /// Unix domain socket to relay connections to
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_TARGET_SOCKET, env = "TCP_UNIX_PROXY_SOCKET")]
    pub socket: PathBuf,

    /// Read buffer size per direction, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Maximum number of connections relayed at once (unbounded if omitted)
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
}

impl RelayArgs {
    /// Build the engine configuration from the parsed arguments
    pub fn to_config(&self) -> ProxyConfig {
        let config = ProxyConfig::new(&self.socket)
            .listen_host(&self.host)
            .listen_port(self.port)
            .buffer_size(self.buffer_size);
        match self.max_connections {
            Some(limit) => config.max_connections(limit),
            None => config,
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Human,
    /// One JSON object per line
    Json,
}
