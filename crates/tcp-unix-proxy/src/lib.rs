//! # tcp-unix-proxy
//!
//! Exposes a Unix domain socket (a container engine's control socket, say) on a
//! TCP endpoint. Every accepted TCP connection gets its own freshly dialed
//! connection to the target socket, and bytes are copied between the two
//! unmodified until either side hangs up.
//!
//! - **Listener**: binds the TCP endpoint (port 0 picks a free port) and runs
//!   the accept loop on a background task
//! - **Pump**: one task per direction per connection pair; when either
//!   direction ends, both connections are closed exactly once
//! - **Shutdown**: [`TcpUnixProxy::stop`] ends the accept loop and closes the
//!   listening socket; pairs already relaying run until their own I/O ends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tcp_unix_proxy::{ProxyConfig, TcpUnixProxy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::new("/var/run/docker.sock")
//!         .listen_host("127.0.0.1")
//!         .listen_port(2375);
//!
//!     let proxy = TcpUnixProxy::new(config)?;
//!     let addr = proxy.start().await?;
//!     println!("listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     proxy.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::all
)]
#![deny(unsafe_code)]

mod close;
mod config;
mod error;
mod listener;
mod metrics;
mod pump;

pub use close::CloseGuard;
pub use config::{DEFAULT_BUFFER_SIZE, DEFAULT_LISTEN_HOST, DEFAULT_TARGET_SOCKET, ProxyConfig};
pub use error::{ProxyError, ProxyResult};
pub use listener::TcpUnixProxy;
pub use metrics::{AtomicMetrics, ProxyMetrics};
pub use pump::{Direction, Pump, PumpSettings, copy_until_failure};

/// Version of tcp-unix-proxy
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
