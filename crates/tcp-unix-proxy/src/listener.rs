//! TCP listener and accept loop

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::metrics::{AtomicMetrics, ProxyMetrics};
use crate::pump::{Pump, PumpSettings};

/// Pause after a failed accept so a persistent error does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Listens on a TCP port and relays every connection to a Unix domain socket
///
/// Like `socat TCP-LISTEN:2375,fork UNIX-CONNECT:/var/run/docker.sock`, and
/// nothing more: bytes are copied unmodified in both directions.
///
/// ```rust,ignore
/// use tcp_unix_proxy::{ProxyConfig, TcpUnixProxy};
///
/// let proxy = TcpUnixProxy::new(ProxyConfig::new("/var/run/docker.sock"))?;
/// let addr = proxy.start().await?;
/// println!("docker API on tcp://{addr}");
/// // ...
/// proxy.stop().await;
/// ```
pub struct TcpUnixProxy {
    config: ProxyConfig,
    metrics: Arc<AtomicMetrics>,
    running: Mutex<Option<AcceptLoop>>,
}

/// Handle on a running accept loop
struct AcceptLoop {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

// Manual Debug implementation to keep the join handle and channel out of the output
impl std::fmt::Debug for TcpUnixProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpUnixProxy")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl TcpUnixProxy {
    /// Create a proxy for `config`
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the configuration is invalid,
    /// in particular if the target socket file does not exist.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: Arc::new(AtomicMetrics::new()),
            running: Mutex::new(None),
        })
    }

    /// Listen on `localhost` with an OS-assigned port, relaying to `target_socket_path`
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the socket file does not exist.
    pub fn with_target(target_socket_path: impl Into<PathBuf>) -> ProxyResult<Self> {
        Self::new(ProxyConfig::new(target_socket_path))
    }

    /// Bind the listener and start accepting in the background
    ///
    /// Returns the bound address as soon as the socket is listening; with
    /// `listen_port = 0` this is where the assigned port can be read.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if the address cannot be resolved or bound, and
    /// [`ProxyError::AlreadyRunning`] if the proxy was already started.
    pub async fn start(&self) -> ProxyResult<SocketAddr> {
        if let Some(running) = self.running.lock().as_ref() {
            return Err(ProxyError::AlreadyRunning(running.local_addr));
        }

        let bind_addr = self.config.listen_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ProxyError::bind(&bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            // A concurrent start won the race; our listener is dropped here
            return Err(ProxyError::AlreadyRunning(existing.local_addr));
        }

        info!(
            "Listening on {} and proxying to {}",
            local_addr,
            self.config.target().display()
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let acceptor = Acceptor {
            target: self.config.target_socket_path.clone(),
            limiter: self
                .config
                .max_connections
                .map(|limit| Arc::new(Semaphore::new(limit))),
            settings: PumpSettings {
                buffer_size: self.config.buffer_size,
                metrics: Arc::clone(&self.metrics),
            },
        };
        let task = tokio::spawn(acceptor.run(listener, shutdown_rx));

        *running = Some(AcceptLoop {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close the listening socket
    ///
    /// Pairs already relaying are left to finish on their own. Calling this more
    /// than once, or before [`start`](Self::start), does nothing.
    pub async fn stop(&self) {
        let Some(accept) = self.running.lock().take() else {
            debug!("Proxy not running, nothing to stop");
            return;
        };

        // Err only means the loop is already gone
        let _ = accept.shutdown_tx.send(());
        if let Err(e) = accept.task.await
            && e.is_panic()
        {
            error!("Accept loop for {} panicked: {}", accept.local_addr, e);
        }
        info!("Stopped listening on {}", accept.local_addr);
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Whether the accept loop is running
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// The configuration this proxy was built with
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Snapshot of relay counters
    pub fn metrics(&self) -> ProxyMetrics {
        self.metrics.snapshot()
    }
}

impl Drop for TcpUnixProxy {
    fn drop(&mut self) {
        if let Some(accept) = self.running.get_mut().take() {
            let _ = accept.shutdown_tx.send(());
        }
    }
}

/// Everything the accept loop needs, moved into its task
struct Acceptor {
    target: PathBuf,
    limiter: Option<Arc<Semaphore>>,
    settings: PumpSettings,
}

impl Acceptor {
    async fn run(self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                // Fires on stop() and when the proxy is dropped
                _ = shutdown_rx.recv() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }

                result = listener.accept() => match result {
                    Ok((stream, peer)) => self.handle_inbound(stream, peer).await,
                    Err(e) => {
                        warn!("Failed to accept TCP connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
        // listener dropped here, closing the socket
    }

    async fn handle_inbound(&self, inbound: TcpStream, peer: SocketAddr) {
        let metrics = &self.settings.metrics;
        metrics.inc_connections_accepted();
        debug!("Accepting incoming connection from {}", peer);

        let permit = match &self.limiter {
            Some(limiter) => match Arc::clone(limiter).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    metrics.inc_connections_rejected();
                    warn!("Connection limit reached, closing connection from {}", peer);
                    return;
                }
            },
            None => None,
        };

        match UnixStream::connect(&self.target).await {
            Ok(outbound) => {
                let pump =
                    Pump::start_with_permit(inbound, outbound, self.settings.clone(), permit);
                debug!(pair = %pump.id(), %peer, "Started pump");
            }
            Err(e) => {
                metrics.inc_target_connect_failures();
                warn!(
                    "Failed to connect to {}: {}; closing connection from {}",
                    self.target.display(),
                    e,
                    peer
                );
            }
        }
    }
}
