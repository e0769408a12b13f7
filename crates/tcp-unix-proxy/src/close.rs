//! Close-once guard shared by the two copy loops of a pair

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Per-connection close-once flag
///
/// Both copy loops of a pair hold a guard for each connection and call
/// [`close`](Self::close) when they stop. Only the first caller performs the
/// teardown; any later call is a no-op. Loops blocked on I/O wait on
/// [`cancelled`](Self::cancelled) so they are released as soon as the connection
/// is closed from the other direction.
#[derive(Debug, Default)]
pub struct CloseGuard {
    closed: AtomicBool,
    token: CancellationToken,
}

impl CloseGuard {
    /// Create a guard for an open connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection closed
    ///
    /// Returns `true` only for the one caller that actually closed it.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.token.cancel();
            true
        } else {
            false
        }
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is closed
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}
