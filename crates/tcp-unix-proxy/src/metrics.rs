//! Relay metrics collection
//!
//! Lock-free counters shared by the accept loop and every pump.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free atomic counters for the relay engine
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Inbound TCP connections accepted
    pub connections_accepted: AtomicU64,

    /// Inbound connections closed because the connection limit was reached
    pub connections_rejected: AtomicU64,

    /// Outbound connections to the target socket that failed
    pub target_connect_failures: AtomicU64,

    /// Pairs currently relaying
    pub active_pairs: AtomicU64,

    /// Pairs torn down
    pub pairs_closed: AtomicU64,

    /// Bytes copied from clients to the target socket
    pub bytes_to_target: AtomicU64,

    /// Bytes copied from the target socket back to clients
    pub bytes_to_client: AtomicU64,
}

impl AtomicMetrics {
    /// Create a new metrics block with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted inbound connection
    pub fn inc_connections_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound connection turned away by the connection limit
    pub fn inc_connections_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed dial of the target socket
    pub fn inc_target_connect_failures(&self) {
        self.target_connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new pair handed to a pump
    pub fn pair_opened(&self) {
        self.active_pairs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pair teardown; called once per pair
    pub fn pair_closed(&self) {
        // Pairs with the Acquire load in snapshot, so everything released
        // during teardown is visible once the pair no longer counts as active
        self.active_pairs.fetch_sub(1, Ordering::Release);
        self.pairs_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes relayed towards the target
    pub fn add_bytes_to_target(&self, bytes: u64) {
        self.bytes_to_target.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes relayed back to the client
    pub fn add_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics
    ///
    /// Each counter is read atomically, but the snapshot as a whole is not.
    pub fn snapshot(&self) -> ProxyMetrics {
        ProxyMetrics {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            target_connect_failures: self.target_connect_failures.load(Ordering::Relaxed),
            active_pairs: self.active_pairs.load(Ordering::Acquire),
            pairs_closed: self.pairs_closed.load(Ordering::Relaxed),
            bytes_to_target: self.bytes_to_target.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay metrics at a point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyMetrics {
    /// Inbound TCP connections accepted
    pub connections_accepted: u64,

    /// Inbound connections closed because the connection limit was reached
    pub connections_rejected: u64,

    /// Outbound connections to the target socket that failed
    pub target_connect_failures: u64,

    /// Pairs currently relaying
    pub active_pairs: u64,

    /// Pairs torn down
    pub pairs_closed: u64,

    /// Bytes copied from clients to the target socket
    pub bytes_to_target: u64,

    /// Bytes copied from the target socket back to clients
    pub bytes_to_client: u64,
}

impl ProxyMetrics {
    /// Bytes relayed in both directions
    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_target + self.bytes_to_client
    }
}
