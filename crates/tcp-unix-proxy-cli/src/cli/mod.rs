//! Command-line interface for tcp-unix-proxy
//!
//! ```text
//! cli/
//! ├── args.rs       # Listen/target arguments and log format
//! └── error.rs      # User-friendly error display
//! ```

pub mod args;
pub mod error;

use std::io::IsTerminal;

use clap::Parser;
use tcp_unix_proxy::{ProxyResult, TcpUnixProxy};
use tracing::level_filters::LevelFilter;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use self::args::{LogFormat, RelayArgs};

/// tcp-unix-proxy - expose a Unix domain socket on a TCP port
///
/// Like `socat TCP-LISTEN:2375,fork UNIX-CONNECT:/var/run/docker.sock`.
#[derive(Parser, Debug)]
#[command(
    name = "tcp-unix-proxy",
    version,
    about = "Relay TCP connections to a Unix domain socket",
    long_about = "Listens on a TCP port and relays every connection, byte for byte, to a fresh\n\
                  connection on a local Unix domain socket. Runs until interrupted (Ctrl-C)."
)]
pub struct Cli {
    /// Listen and target settings
    #[command(flatten)]
    pub relay: RelayArgs,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Run the proxy until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if the configuration is invalid or the listener
    /// cannot be bound.
    pub async fn execute(self) -> ProxyResult<()> {
        self.init_tracing();

        if self.no_color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        let proxy = TcpUnixProxy::new(self.relay.to_config())?;
        let addr = proxy.start().await?;
        info!(
            "Proxying tcp://{} to unix://{}",
            addr,
            proxy.config().target().display()
        );

        tokio::signal::ctrl_c().await?;
        info!("Interrupted, shutting down");
        proxy.stop().await;

        let metrics = proxy.metrics();
        info!(
            accepted = metrics.connections_accepted,
            rejected = metrics.connections_rejected,
            target_failures = metrics.target_connect_failures,
            still_active = metrics.active_pairs,
            bytes = metrics.total_bytes(),
            "Relay finished"
        );
        Ok(())
    }

    fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        }
    }

    /// Initialize tracing; `RUST_LOG` takes precedence over the verbosity flags
    fn init_tracing(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.log_level()).into())
            .from_env_lossy();

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);

        // Err only if a subscriber is already installed
        let _ = match self.log_format {
            LogFormat::Human => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    }
}
