// ABOUTME: TCP load-balancing relay over a pool of outbound connections
//
// This module relays each accepted client over one member of a pool of
// long-lived connections to every IP the target host resolves to.
//
// Key components:
// - target: host:port value the pool connects to
// - resolver: hostname -> IPs (trait + DNS implementation)
// - dialer: IP -> keep-alive TCP stream (trait + tokio/socket2 implementation)
// - member: one pooled outbound connection
// - pool: initialize/acquire/report_failure/drain with self-healing
// - forwarder: two copy loops per client, reports outbound failures
// - listener: accept loop dispatching clients to the forwarder
// - metrics: counters for observability

pub mod dialer;
pub mod forwarder;
pub mod listener;
pub mod member;
pub mod metrics;
pub mod pool;
pub mod resolver;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use dialer::{Dialer, TcpDialer};
pub use forwarder::{Forwarder, SessionSummary, DEFAULT_BUFFER_SIZE};
pub use listener::{Listener, ListenerError, DEFAULT_ACCEPT_BACKOFF};
pub use member::{MemberId, PoolMember};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use pool::{ConnectionPool, FailureOutcome, MemberInfo, PoolError, PoolResult, PoolStatus};
pub use resolver::{DnsResolver, ResolveError, Resolver};
pub use target::{Target, TargetError};
