// ABOUTME: Outbound TCP dialing for pool members
// ABOUTME: Dialer trait plus a tokio/socket2 implementation that enables keep-alive

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::RelayConfig;

/// Opens one outbound connection to a resolved address.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// Dialer used in production: plain TCP connect plus keep-alive tuning.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Keep-alive idle time and probe interval
    keepalive: Duration,

    /// Upper bound on connect; `None` leaves it to the OS
    connect_timeout: Option<Duration>,

    /// Disable Nagle's algorithm
    nodelay: bool,
}

impl TcpDialer {
    pub const fn new(keepalive: Duration) -> Self {
        Self {
            keepalive,
            connect_timeout: None,
            nodelay: false,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.keepalive_interval)
            .with_connect_timeout(config.connect_timeout)
            .with_nodelay(config.nodelay)
    }

    pub const fn keepalive(&self) -> Duration {
        self.keepalive
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {addr} timed out after {limit:?}"),
                    )
                })?,
            None => TcpStream::connect(addr).await,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = self.connect(addr).await?;

        // A stream we cannot tune is dropped, which closes it
        let sock = SockRef::from(&stream);
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "windows"
        ))]
        let keepalive = keepalive.with_interval(self.keepalive);
        sock.set_tcp_keepalive(&keepalive)?;

        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        debug!(remote = %addr, keepalive = ?self.keepalive, "Dialed pool member");
        Ok(stream)
    }
}
