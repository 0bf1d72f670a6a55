// ABOUTME: A single established outbound connection held by the pool
// ABOUTME: Cheap to clone; identity is the pool-assigned id, not the address

use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::TcpStream;

/// Pool-assigned identity of a member. Never reused within a pool.
pub type MemberId = u64;

/// One live outbound connection.
///
/// Clones share the same socket, so any number of forwarders may hold the
/// same member at once. Two members are equal only if they have the same id.
#[derive(Debug, Clone)]
pub struct PoolMember {
    id: MemberId,
    remote: SocketAddr,
    stream: Arc<TcpStream>,
}

impl PoolMember {
    pub(crate) fn new(id: MemberId, remote: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            remote,
            stream: Arc::new(stream),
        }
    }

    pub const fn id(&self) -> MemberId {
        self.id
    }

    /// Resolved address this member was dialed on
    pub const fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub const fn remote_ip(&self) -> IpAddr {
        self.remote.ip()
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Shut the socket down in both directions.
    ///
    /// Every clone observes the close: pending reads see EOF and writes
    /// fail. Errors (e.g. already disconnected) are ignored.
    pub fn close(&self) {
        close_stream(&self.stream);
    }
}

impl PartialEq for PoolMember {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PoolMember {}

pub(crate) fn close_stream(stream: &TcpStream) {
    let _ = SockRef::from(stream).shutdown(Shutdown::Both);
}
