// ABOUTME: Self-healing pool of outbound connections to every IP the target resolves to
// ABOUTME: initialize/acquire/report_failure/drain all go through one async mutex

//! Connection pool management.
//!
//! The `ConnectionPool` keeps one long-lived TCP connection per resolved IP
//! of the target host and hands them out to forwarders:
//! - `initialize` drains, resolves and dials every IP (partial pools allowed)
//! - `acquire` picks a random member, repopulating first if the pool shrank
//! - `report_failure` redials a failed member once, or removes it
//! - `release` does the same for a member whose session ended cleanly
//! - `drain` closes everything
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ConnectionPool                       │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  state: Mutex<PoolState>                           │  │
//! │  │     slots: [10.0.0.1 #4] [10.0.0.2 #5] [10.0.0.3*] │  │
//! │  │     target_size: 3          (* = redial in flight) │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  ┌──────────┐  ┌──────────┐  ┌───────────────────────┐   │
//! │  │ Resolver │  │  Dialer  │  │ redial_permits (bound)│   │
//! │  └──────────┘  └──────────┘  └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Members are shared: several clients may be relayed over the same outbound
//! connection at once. Only `initialize` holds the lock across network calls.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use super::dialer::Dialer;
use super::member::{MemberId, PoolMember};
use super::metrics::RelayMetrics;
use super::resolver::{ResolveError, Resolver};
use super::target::Target;

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Target host could not be resolved
    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// What `report_failure` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Pool was undersized, so every member was redialed
    Reinitialized,
    /// A fresh connection took the failed member's slot
    Replaced,
    /// The member was dropped and the pool shrank
    Removed,
    /// Someone else already dealt with this member
    AlreadyHandled,
}

/// Snapshot of pool state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    pub target_size: usize,
    pub replacing: usize,
    pub last_initialized: Option<DateTime<Utc>>,
}

/// Public view of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: MemberId,
    pub remote: SocketAddr,
    pub replacing: bool,
}

struct Slot {
    member: PoolMember,
    /// A redial for this member is in flight; not handed out meanwhile
    replacing: bool,
}

impl Slot {
    const fn new(member: PoolMember) -> Self {
        Self {
            member,
            replacing: false,
        }
    }
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    target_size: usize,
    last_initialized: Option<DateTime<Utc>>,
}

impl PoolState {
    /// An empty pool is always worth another attempt
    fn needs_repopulate(&self) -> bool {
        self.slots.is_empty() || self.slots.len() < self.target_size
    }

    fn position(&self, id: MemberId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.member.id() == id)
    }

    fn drain(&mut self) -> usize {
        let count = self.slots.len();
        for slot in self.slots.drain(..) {
            // Replacing slots were closed when the redial started
            if !slot.replacing {
                slot.member.close();
            }
        }
        count
    }
}

/// Pool of outbound connections to the resolved IPs of one target
pub struct ConnectionPool {
    target: Target,
    resolver: Arc<dyn Resolver>,
    dialer: Arc<dyn Dialer>,
    state: Mutex<PoolState>,
    redial_permits: Semaphore,
    max_redials: usize,
    next_id: AtomicU64,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("target", &self.target)
            .field("max_redials", &self.max_redials)
            .field("redials_in_flight", &self.redials_in_flight())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create an empty pool. Nothing is dialed until `initialize` or the
    /// first `acquire`.
    ///
    /// `max_concurrent_redials` bounds how many single-member redials may
    /// run at once; failures beyond that remove the member instead.
    pub fn new(
        target: Target,
        resolver: Arc<dyn Resolver>,
        dialer: Arc<dyn Dialer>,
        max_concurrent_redials: usize,
    ) -> Self {
        Self {
            target,
            resolver,
            dialer,
            state: Mutex::new(PoolState::default()),
            redial_permits: Semaphore::new(max_concurrent_redials),
            max_redials: max_concurrent_redials,
            next_id: AtomicU64::new(1),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    /// Share an existing metrics registry instead of a private one
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub const fn target(&self) -> &Target {
        &self.target
    }

    pub const fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn target_size(&self) -> usize {
        self.state.lock().await.target_size
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        PoolStatus {
            size: state.slots.len(),
            target_size: state.target_size,
            replacing: state.slots.iter().filter(|slot| slot.replacing).count(),
            last_initialized: state.last_initialized,
        }
    }

    /// Current members in slot order
    pub async fn members(&self) -> Vec<MemberInfo> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .map(|slot| MemberInfo {
                id: slot.member.id(),
                remote: slot.member.remote(),
                replacing: slot.replacing,
            })
            .collect()
    }

    pub fn redials_in_flight(&self) -> usize {
        self.max_redials
            .saturating_sub(self.redial_permits.available_permits())
    }

    /// Drop all members, then resolve and dial the target from scratch.
    ///
    /// Returns the new target size. Dial failures only shrink the pool;
    /// a resolution failure leaves it empty and is returned.
    pub async fn initialize(&self) -> PoolResult<usize> {
        let mut state = self.state.lock().await;
        self.initialize_locked(&mut state).await
    }

    /// Pick a member for a new client.
    ///
    /// Repopulates first if the pool is below its target size or empty.
    /// Returns `None` when nothing could be dialed.
    pub async fn acquire(&self) -> Option<PoolMember> {
        let mut state = self.state.lock().await;

        if state.needs_repopulate() {
            debug!(
                size = state.slots.len(),
                target_size = state.target_size,
                "Pool below target size, reinitializing"
            );
            self.heal_locked(&mut state).await;
        }

        let available: Vec<&PoolMember> = state
            .slots
            .iter()
            .filter(|slot| !slot.replacing)
            .map(|slot| &slot.member)
            .collect();

        if available.is_empty() {
            warn!(upstream = %self.target, "No connections available in the pool");
            return None;
        }

        debug!(
            members = ?available.iter().map(|m| m.remote()).collect::<Vec<_>>(),
            "Current pool members"
        );

        let chosen = available[rand::thread_rng().gen_range(0..available.len())].clone();
        debug!(member = chosen.id(), remote = %chosen.remote(), "Retrieved connection from pool");
        Some(chosen)
    }

    /// Tell the pool a member failed during forwarding.
    ///
    /// Safe to call repeatedly for the same member: only the first call
    /// acts, later ones return `AlreadyHandled`.
    pub async fn report_failure(&self, member: &PoolMember) -> FailureOutcome {
        self.metrics.failure_reported();
        self.retire(member).await
    }

    /// Hand back a member whose session ended on the client side.
    ///
    /// Its socket is spent either way, so the slot is redialed exactly as
    /// for a failure, without counting one.
    pub async fn release(&self, member: &PoolMember) -> FailureOutcome {
        self.metrics.member_released();
        self.retire(member).await
    }

    /// Close `member` and put a fresh connection in its slot. The pool is
    /// the only place member sockets get closed.
    async fn retire(&self, member: &PoolMember) -> FailureOutcome {
        let mut state = self.state.lock().await;

        if state.needs_repopulate() {
            info!(
                size = state.slots.len(),
                target_size = state.target_size,
                "Pool below target size, reinitializing"
            );
            self.heal_locked(&mut state).await;
            return FailureOutcome::Reinitialized;
        }

        let Some(idx) = state.position(member.id()) else {
            debug!(member = member.id(), "Member already retired");
            return FailureOutcome::AlreadyHandled;
        };
        if state.slots[idx].replacing {
            debug!(member = member.id(), "Redial already in flight");
            return FailureOutcome::AlreadyHandled;
        }

        let Ok(permit) = self.redial_permits.try_acquire() else {
            let slot = state.slots.remove(idx);
            slot.member.close();
            warn!(
                remote = %member.remote(),
                in_flight = self.max_redials,
                "Redial limit reached, removing member"
            );
            return FailureOutcome::Removed;
        };

        state.slots[idx].replacing = true;
        drop(state);

        info!(member = member.id(), remote = %member.remote(), "Removing connection from pool, redialing");
        member.close();
        let dialed = self.dialer.dial(member.remote()).await;
        drop(permit);

        let mut state = self.state.lock().await;
        let Some(idx) = state.position(member.id()) else {
            // Pool was reinitialized while we were dialing; the fresh
            // stream (if any) is dropped here
            debug!(member = member.id(), "Pool changed during redial, discarding");
            return FailureOutcome::AlreadyHandled;
        };

        match dialed {
            Ok(stream) => {
                let fresh = self.new_member(member.remote(), stream);
                info!(
                    old = member.id(),
                    new = fresh.id(),
                    remote = %fresh.remote(),
                    "Recreated connection"
                );
                state.slots[idx] = Slot::new(fresh);
                self.metrics.redial_succeeded();
                FailureOutcome::Replaced
            }
            Err(e) => {
                state.slots.remove(idx);
                warn!(
                    remote = %member.remote(),
                    error = %e,
                    size = state.slots.len(),
                    "Failed to recreate connection, pool shrank"
                );
                self.metrics.redial_failed();
                FailureOutcome::Removed
            }
        }
    }

    /// Close every member and empty the pool. Returns how many were closed.
    pub async fn drain(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.drain();
        info!(count = count, "Drained connection pool");
        count
    }

    async fn initialize_locked(&self, state: &mut PoolState) -> PoolResult<usize> {
        let drained = state.drain();
        if drained > 0 {
            debug!(count = drained, "Closed previous pool members");
        }

        let ips = self.resolver.resolve(self.target.host()).await?;
        info!(host = self.target.host(), count = ips.len(), "Found IPs for target host");

        // Lock stays held for the whole sweep so nothing interleaves
        for ip in ips {
            let remote = SocketAddr::new(ip, self.target.port());
            match self.dialer.dial(remote).await {
                Ok(stream) => {
                    let member = self.new_member(remote, stream);
                    info!(member = member.id(), remote = %remote, "Connected");
                    state.slots.push(Slot::new(member));
                }
                Err(e) => {
                    warn!(remote = %remote, error = %e, "Failed to connect, skipping");
                }
            }
        }

        state.target_size = state.slots.len();
        state.last_initialized = Some(Utc::now());
        self.metrics.reinitialized();

        if state.target_size == 0 {
            warn!(upstream = %self.target, "Pool initialized with no members");
        } else {
            info!(upstream = %self.target, size = state.target_size, "Pool initialized");
        }

        Ok(state.target_size)
    }

    async fn heal_locked(&self, state: &mut PoolState) {
        if let Err(e) = self.initialize_locked(state).await {
            error!(upstream = %self.target, error = %e, "Failed to repopulate pool");
        }
    }

    fn new_member(&self, remote: SocketAddr, stream: TcpStream) -> PoolMember {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        PoolMember::new(id, remote, stream)
    }
}
