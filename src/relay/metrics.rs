// ABOUTME: Counters for relay observability
//
// Tracks:
// - Clients: accepted, rejected for lack of a pool member
// - Pool: failures reported, members released, redials, full reinitializations
// - Traffic: bytes relayed in each direction

use std::sync::atomic::{AtomicU64, Ordering};

/// Relay-wide counters, shared by the pool, forwarder and listener
#[derive(Debug, Default)]
pub struct RelayMetrics {
    pub clients_accepted: AtomicU64,
    pub clients_rejected: AtomicU64,
    pub failures_reported: AtomicU64,
    pub members_released: AtomicU64,
    pub redials_succeeded: AtomicU64,
    pub redials_failed: AtomicU64,
    pub reinitializations: AtomicU64,
    pub bytes_to_target: AtomicU64,
    pub bytes_to_client: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub clients_accepted: u64,
    pub clients_rejected: u64,
    pub failures_reported: u64,
    pub members_released: u64,
    pub redials_succeeded: u64,
    pub redials_failed: u64,
    pub reinitializations: u64,
    pub bytes_to_target: u64,
    pub bytes_to_client: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_rejected(&self) {
        self.clients_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_reported(&self) {
        self.failures_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn member_released(&self) {
        self.members_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn redial_succeeded(&self) {
        self.redials_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn redial_failed(&self) {
        self.redials_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reinitialized(&self) {
        self.reinitializations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_to_target(&self, n: u64) {
        self.bytes_to_target.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_to_client(&self, n: u64) {
        self.bytes_to_client.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            clients_rejected: self.clients_rejected.load(Ordering::Relaxed),
            failures_reported: self.failures_reported.load(Ordering::Relaxed),
            members_released: self.members_released.load(Ordering::Relaxed),
            redials_succeeded: self.redials_succeeded.load(Ordering::Relaxed),
            redials_failed: self.redials_failed.load(Ordering::Relaxed),
            reinitializations: self.reinitializations.load(Ordering::Relaxed),
            bytes_to_target: self.bytes_to_target.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
        }
    }
}
