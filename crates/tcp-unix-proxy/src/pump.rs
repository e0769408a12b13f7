//! Bidirectional byte pump for one inbound/outbound connection pair
//!
//! Two tasks run per pair, one per direction. Each reads a bounded block from
//! its source and writes it straight to its destination. When either loop ends,
//! both connections are closed through their [`CloseGuard`]s; the other loop is
//! released by the guard's cancellation and the sockets are dropped once both
//! tasks have returned.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::close::CloseGuard;
use crate::metrics::AtomicMetrics;

/// Direction of a copy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound TCP client towards the target socket
    ClientToTarget,
    /// Target socket back to the TCP client
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client->target"),
            Direction::TargetToClient => write!(f, "target->client"),
        }
    }
}

/// Per-pair settings handed down by the listener
#[derive(Debug, Clone)]
pub struct PumpSettings {
    /// Read buffer size per direction
    pub buffer_size: usize,
    /// Shared counters
    pub metrics: Arc<AtomicMetrics>,
}

/// State shared by the two copy loops of one pair
#[derive(Debug)]
struct Pair {
    id: Uuid,
    inbound: CloseGuard,
    outbound: CloseGuard,
    metrics: Arc<AtomicMetrics>,
    // Connection-limit slot, given back by whichever loop tears the pair down
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Pair {
    fn new(id: Uuid, metrics: Arc<AtomicMetrics>, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            id,
            inbound: CloseGuard::new(),
            outbound: CloseGuard::new(),
            metrics,
            permit: Mutex::new(permit),
        }
    }

    /// Close both connections. Safe to call from both loops at once.
    fn close(&self, origin: Direction) {
        // Inbound is always closed first, so its winner is the pair's single origin
        if self.inbound.close() {
            trace!(pair = %self.id, %origin, "{origin} died, closing sockets");
            // Slot is free before the pair stops counting as active
            drop(self.permit.lock().take());
            self.metrics.pair_closed();
        }
        self.outbound.close();
    }

    async fn closed(&self) {
        tokio::select! {
            () = self.inbound.cancelled() => {}
            () = self.outbound.cancelled() => {}
        }
    }
}

/// A running relay between one TCP client and the target socket
///
/// The pump has no stop or join operation: it ends by itself when either side
/// reaches end-of-stream or fails.
#[derive(Debug)]
pub struct Pump {
    id: Uuid,
}

impl Pump {
    /// Start relaying between `inbound` and `outbound`
    ///
    /// Spawns one task per direction and returns immediately. Must be called from
    /// within a tokio runtime.
    pub fn start(inbound: TcpStream, outbound: UnixStream, settings: PumpSettings) -> Self {
        Self::start_with_permit(inbound, outbound, settings, None)
    }

    /// Like [`start`](Self::start), holding a connection-limit permit until the
    /// pair is torn down
    pub(crate) fn start_with_permit(
        inbound: TcpStream,
        outbound: UnixStream,
        settings: PumpSettings,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let id = Uuid::new_v4();
        let pair = Arc::new(Pair::new(id, Arc::clone(&settings.metrics), permit));
        settings.metrics.pair_opened();
        debug!(pair = %id, "Relaying pair");

        let (from_client, to_client) = inbound.into_split();
        let (from_target, to_target) = outbound.into_split();

        tokio::spawn(relay(
            Direction::ClientToTarget,
            from_client,
            to_target,
            settings.buffer_size,
            Arc::clone(&pair),
        ));
        tokio::spawn(relay(
            Direction::TargetToClient,
            from_target,
            to_client,
            settings.buffer_size,
            pair,
        ));

        Self { id }
    }

    /// Identifier attached to this pair's log lines
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Run one direction until it ends or the pair is closed, then close the pair
async fn relay<R, W>(
    direction: Direction,
    mut from: R,
    mut to: W,
    buffer_size: usize,
    pair: Arc<Pair>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let metrics = Arc::clone(&pair.metrics);
    let record = |n: usize| match direction {
        Direction::ClientToTarget => metrics.add_bytes_to_target(n as u64),
        Direction::TargetToClient => metrics.add_bytes_to_client(n as u64),
    };

    tokio::select! {
        result = copy_until_failure(&mut from, &mut to, buffer_size, record) => match result {
            Ok(copied) => trace!(pair = %pair.id, %direction, copied, "Source reached end of stream"),
            Err(e) => debug!(pair = %pair.id, %direction, "Relay stopped: {}", e),
        },
        () = pair.closed() => {
            trace!(pair = %pair.id, %direction, "Pair closed by the other direction");
        }
    }

    pair.close(direction);
}

/// Copy from `from` to `to` until `from` reaches end-of-stream or any I/O fails
///
/// Every non-empty read is written out in full before the next read. `on_chunk`
/// is called with the size of each chunk once it has been written. Returns the
/// total number of bytes copied on end-of-stream.
///
/// # Errors
///
/// Returns the first read, write or flush error from either side.
pub async fn copy_until_failure<R, W, F>(
    from: &mut R,
    to: &mut W,
    buffer_size: usize,
    mut on_chunk: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(usize),
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let read = from.read(&mut buffer).await?;
        if read == 0 {
            return Ok(total);
        }
        to.write_all(&buffer[..read]).await?;
        to.flush().await?;
        on_chunk(read);
        total += read as u64;
    }
}
