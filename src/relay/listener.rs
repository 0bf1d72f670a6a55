// ABOUTME: Accept loop that hands each inbound client to the forwarder
// ABOUTME: Accept errors are logged and retried after a fixed backoff, never fatal

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::forwarder::Forwarder;
use super::pool::ConnectionPool;

/// Default accept-error backoff
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// How often the accept loop wakes to check for shutdown
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// How long `stop` waits for the accept loop to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while running the listener
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind the listening socket
    #[error("Failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener is not running when expected
    #[error("Listener is not running")]
    NotRunning,

    /// Listener is already running
    #[error("Listener is already running")]
    AlreadyRunning,
}

/// Listening side of the relay.
pub struct Listener {
    pool: Arc<ConnectionPool>,
    forwarder: Forwarder,
    accept_backoff: Duration,
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(pool: Arc<ConnectionPool>, forwarder: Forwarder, accept_backoff: Duration) -> Self {
        Self {
            pool,
            forwarder,
            accept_backoff,
            shutdown: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            handle: None,
        }
    }

    /// Bind `addr` and start accepting in the background.
    ///
    /// Returns the bound address, which differs from `addr` when port 0
    /// was requested.
    pub async fn start(&mut self, addr: &str) -> Result<SocketAddr, ListenerError> {
        if self.is_running() {
            return Err(ListenerError::AlreadyRunning);
        }

        let bind_err = |source| ListenerError::BindFailed {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        self.shutdown.store(false, Ordering::SeqCst);
        self.local_addr = Some(local_addr);

        info!(
            listen = %local_addr,
            upstream = %self.pool.target(),
            "Listening for clients"
        );

        let handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&self.pool),
            self.forwarder.clone(),
            self.accept_backoff,
            Arc::clone(&self.shutdown),
        ));
        self.handle = Some(handle);

        Ok(local_addr)
    }

    /// Stop accepting. Sessions already running are left to finish.
    pub async fn stop(&mut self) -> Result<(), ListenerError> {
        if !self.is_running() {
            return Err(ListenerError::NotRunning);
        }

        info!(listen = ?self.local_addr, "Stopping listener");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            join_accept_task(handle, STOP_TIMEOUT).await;
        }
        self.local_addr = None;

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn accept_loop(
        listener: TcpListener,
        pool: Arc<ConnectionPool>,
        forwarder: Forwarder,
        accept_backoff: Duration,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutdown requested");
                break;
            }

            // Accept with timeout so we can check the shutdown flag
            match tokio::time::timeout(SHUTDOWN_POLL, listener.accept()).await {
                Ok(Ok((client, peer))) => {
                    debug!(peer = %peer, "Accepted client");
                    pool.metrics().client_accepted();

                    let pool = Arc::clone(&pool);
                    let forwarder = forwarder.clone();
                    tokio::spawn(async move {
                        Self::handle_client(client, &pool, &forwarder).await;
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, backoff = ?accept_backoff, "Failed to accept connection");
                    tokio::time::sleep(accept_backoff).await;
                }
                Err(_) => {
                    // Timeout - loop again to check shutdown
                }
            }
        }

        info!("Accept loop ended");
    }

    async fn handle_client(client: TcpStream, pool: &ConnectionPool, forwarder: &Forwarder) {
        let Some(member) = pool.acquire().await else {
            warn!("Failed to get connection from pool, closing client");
            pool.metrics().client_rejected();
            // Dropping the stream closes it
            return;
        };

        forwarder.run(client, member).await;
    }
}

/// Wait for the accept task. Returns whether it ended cleanly within `limit`;
/// a task that overruns is aborted.
async fn join_accept_task(handle: JoinHandle<()>, limit: Duration) -> bool {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "Accept task ended abnormally");
            false
        }
        Err(_) => {
            warn!(timeout = ?limit, "Accept task did not stop in time, aborting");
            abort.abort();
            false
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::forwarder::DEFAULT_BUFFER_SIZE;
    use crate::relay::test_support::{fake_ip, pool_with_routes, spawn_echo};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn listener_for(pool: &Arc<ConnectionPool>) -> Listener {
        let forwarder = Forwarder::new(Arc::clone(pool), DEFAULT_BUFFER_SIZE);
        Listener::new(Arc::clone(pool), forwarder, DEFAULT_ACCEPT_BACKOFF)
    }

    #[test]
    fn test_listener_error_display() {
        let err = ListenerError::BindFailed {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("Failed to bind listener on 127.0.0.1:1"));
        assert_eq!(ListenerError::NotRunning.to_string(), "Listener is not running");
        assert_eq!(
            ListenerError::AlreadyRunning.to_string(),
            "Listener is already running"
        );
    }

    #[tokio::test]
    async fn test_start_stop() {
        let backend = spawn_echo().await;
        let (pool, _dialer) = pool_with_routes(1, backend, 4);
        let mut listener = listener_for(&pool);

        assert!(!listener.is_running());
        let addr = listener.start("127.0.0.1:0").await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(listener.is_running());
        assert_eq!(listener.local_addr(), Some(addr));

        assert!(matches!(
            listener.start("127.0.0.1:0").await,
            Err(ListenerError::AlreadyRunning)
        ));

        listener.stop().await.unwrap();
        assert!(!listener.is_running());
        assert!(matches!(listener.stop().await, Err(ListenerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_join_accept_task_outcomes() {
        let clean = tokio::spawn(async {});
        assert!(join_accept_task(clean, Duration::from_secs(1)).await);

        let panicked = tokio::spawn(async { panic!("accept loop blew up") });
        assert!(!join_accept_task(panicked, Duration::from_secs(1)).await);

        let stuck = tokio::spawn(std::future::pending::<()>());
        assert!(!join_accept_task(stuck, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let backend = spawn_echo().await;
        let (pool, _dialer) = pool_with_routes(1, backend, 4);
        let mut listener = listener_for(&pool);

        assert!(matches!(
            listener.start("not-an-address").await,
            Err(ListenerError::BindFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_relays_through_pool() {
        let backend = spawn_echo().await;
        let (pool, _dialer) = pool_with_routes(2, backend, 4);
        pool.initialize().await.unwrap();

        let mut listener = listener_for(&pool);
        let addr = listener.start("127.0.0.1:0").await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello relay").await.unwrap();
        let mut buf = [0u8; 11];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello relay");

        assert_eq!(pool.metrics().snapshot().clients_accepted, 1);
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_closed_when_pool_empty() {
        let backend = spawn_echo().await;
        let (pool, dialer) = pool_with_routes(1, backend, 4);
        dialer.unroute(fake_ip(1));
        pool.initialize().await.unwrap();

        let mut listener = listener_for(&pool);
        let addr = listener.start("127.0.0.1:0").await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(pool.metrics().snapshot().clients_rejected, 1);

        listener.stop().await.unwrap();
    }
}
