// ABOUTME: Bidirectional byte relay between one client and one pool member
// ABOUTME: Two copy tasks per client; outbound-leg errors are reported back to the pool

//! Forwarding.
//!
//! ```text
//!   client ──read──▶ [buf] ──write──▶ member     (ToTarget)
//!   client ◀──write── [buf] ◀──read── member     (ToClient)
//! ```
//!
//! Whichever direction finishes first closes the client and hands the
//! member back to the pool, which closes it and redials its slot. That
//! unblocks the other direction. Only an I/O error on the member leg is
//! reported as a failure; a clean EOF from either side, or a client error,
//! is a plain release. Either way the spent member is never reused.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::member::{close_stream, PoolMember};
use super::pool::{ConnectionPool, FailureOutcome};

/// Default copy buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Which way a copy task moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client → pool member
    ToTarget,
    /// pool member → client
    ToClient,
}

/// Which side of the relay an I/O error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Client,
    Member,
}

/// How one copy task stopped
#[derive(Debug)]
enum CopyEnd {
    Eof { leg: Leg },
    Failed { leg: Leg, error: io::Error },
}

impl CopyEnd {
    const fn leg(&self) -> Leg {
        match self {
            Self::Eof { leg } | Self::Failed { leg, .. } => *leg,
        }
    }
}

/// What the finishing direction did with the member
#[derive(Debug, Clone, Copy)]
struct Handback {
    failed: bool,
    outcome: FailureOutcome,
}

/// Result of one forwarding session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub bytes_to_target: u64,
    pub bytes_to_client: u64,
    pub failure_reported: bool,
    /// What the pool did with the member once the session ended
    pub member_outcome: Option<FailureOutcome>,
}

/// Relays a client over a pool member and reports member failures.
#[derive(Debug, Clone)]
pub struct Forwarder {
    pool: Arc<ConnectionPool>,
    buffer_size: usize,
}

impl Forwarder {
    pub fn new(pool: Arc<ConnectionPool>, buffer_size: usize) -> Self {
        Self {
            pool,
            buffer_size: buffer_size.max(1),
        }
    }

    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Relay until either side closes or fails; both sockets are closed on return.
    pub async fn run(&self, client: TcpStream, member: PoolMember) -> SessionSummary {
        let client = Arc::new(client);
        let closing = Arc::new(AtomicBool::new(false));

        let to_target = tokio::spawn(Self::copy(
            Arc::clone(&self.pool),
            Arc::clone(&client),
            member.clone(),
            Direction::ToTarget,
            self.buffer_size,
            Arc::clone(&closing),
        ));
        let to_client = tokio::spawn(Self::copy(
            Arc::clone(&self.pool),
            client,
            member.clone(),
            Direction::ToClient,
            self.buffer_size,
            closing,
        ));

        let (to_target, to_client) = tokio::join!(to_target, to_client);
        let (bytes_to_target, handback_a) = to_target.unwrap_or_else(|e| {
            warn!(error = %e, "Forwarding task failed");
            (0, None)
        });
        let (bytes_to_client, handback_b) = to_client.unwrap_or_else(|e| {
            warn!(error = %e, "Forwarding task failed");
            (0, None)
        });
        let handback = handback_a.or(handback_b);

        debug!(
            member = member.id(),
            to_target = bytes_to_target,
            to_client = bytes_to_client,
            outcome = ?handback.map(|h| h.outcome),
            "Session ended"
        );

        SessionSummary {
            bytes_to_target,
            bytes_to_client,
            failure_reported: handback.is_some_and(|h| h.failed),
            member_outcome: handback.map(|h| h.outcome),
        }
    }

    /// One direction. Returns bytes moved and, for the direction that
    /// finished first, how the member was handed back.
    async fn copy(
        pool: Arc<ConnectionPool>,
        client: Arc<TcpStream>,
        member: PoolMember,
        direction: Direction,
        buffer_size: usize,
        closing: Arc<AtomicBool>,
    ) -> (u64, Option<Handback>) {
        let (src, src_leg, dst, dst_leg) = match direction {
            Direction::ToTarget => (&*client, Leg::Client, member.stream(), Leg::Member),
            Direction::ToClient => (member.stream(), Leg::Member, &*client, Leg::Client),
        };

        let mut buf = vec![0u8; buffer_size];
        let mut total = 0u64;
        let end = loop {
            let n = match read_some(src, &mut buf).await {
                Ok(0) => break CopyEnd::Eof { leg: src_leg },
                Ok(n) => n,
                Err(error) => break CopyEnd::Failed { leg: src_leg, error },
            };
            if let Err(error) = write_all(dst, &buf[..n]).await {
                break CopyEnd::Failed { leg: dst_leg, error };
            }
            total += n as u64;
            match direction {
                Direction::ToTarget => pool.metrics().add_bytes_to_target(n as u64),
                Direction::ToClient => pool.metrics().add_bytes_to_client(n as u64),
            }
        };

        // First one out decides; the other direction's errors are fallout
        if closing.swap(true, Ordering::SeqCst) {
            debug!(?direction, member = member.id(), leg = ?end.leg(), "Forwarding stopped");
            return (total, None);
        }
        close_stream(&client);

        let failed = matches!(end, CopyEnd::Failed { leg: Leg::Member, .. });
        let outcome = match end {
            CopyEnd::Failed {
                leg: Leg::Member,
                error,
            } => {
                warn!(
                    ?direction,
                    member = member.id(),
                    remote = %member.remote(),
                    error = %error,
                    "Pool member failed"
                );
                pool.report_failure(&member).await
            }
            CopyEnd::Failed {
                leg: Leg::Client,
                error,
            } => {
                debug!(?direction, member = member.id(), error = %error, "Client failed");
                pool.release(&member).await
            }
            CopyEnd::Eof { leg } => {
                debug!(?direction, member = member.id(), ?leg, "Stream closed");
                pool.release(&member).await
            }
        };

        (total, Some(Handback { failed, outcome }))
    }
}

/// Read whatever is available through a shared reference
async fn read_some(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            result => return result,
        }
    }
}

/// Write the whole buffer through a shared reference
async fn write_all(stream: &TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        stream.writable().await?;
        match stream.try_write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
