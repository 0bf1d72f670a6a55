// ABOUTME: Test doubles for the relay: static resolver, address-mapping dialer, backends
// ABOUTME: Lets unit tests fake multi-IP targets on top of real loopback sockets

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::dialer::Dialer;
use super::pool::ConnectionPool;
use super::resolver::{ResolveError, Resolver};
use super::target::Target;

/// Port every fake target uses; the dialer ignores it
pub const FAKE_PORT: u16 = 9080;

pub fn fake_ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
}

/// Resolver returning a fixed list
pub struct StaticResolver(pub Vec<IpAddr>);

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if self.0.is_empty() {
            return Err(ResolveError::NoAddresses {
                host: host.to_string(),
            });
        }
        Ok(self.0.clone())
    }
}

/// Dialer that routes fake IPs to real local listeners.
///
/// Unrouted IPs fail with `ConnectionRefused`.
#[derive(Default)]
pub struct MappedDialer {
    routes: Mutex<HashMap<IpAddr, SocketAddr>>,
    dials: AtomicUsize,
}

impl MappedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, ip: IpAddr, to: SocketAddr) {
        self.routes.lock().unwrap().insert(ip, to);
    }

    pub fn unroute(&self, ip: IpAddr) {
        self.routes.lock().unwrap().remove(&ip);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MappedDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let route = self.routes.lock().unwrap().get(&addr.ip()).copied();
        match route {
            Some(to) => TcpStream::connect(to).await,
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no route to {addr}"),
            )),
        }
    }
}

/// Echo server; returns its address
pub async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Server that answers each `PING` with `PONG`
pub async fn spawn_ping_pong() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                while stream.read_exact(&mut buf).await.is_ok() {
                    if &buf == b"PING" && stream.write_all(b"PONG").await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Server that hands every accepted stream to the test
pub async fn spawn_collector() -> (SocketAddr, mpsc::UnboundedReceiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(stream).is_err() {
                break;
            }
        }
    });

    (addr, rx)
}

/// Close with RST instead of FIN
pub fn reset(stream: TcpStream) {
    let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
    drop(stream);
}

/// Connected (client side, server side) loopback pair
pub async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}

/// Pool over `n` fake IPs, each routed to `backend`
pub fn pool_with_routes(
    n: u8,
    backend: SocketAddr,
    max_redials: usize,
) -> (Arc<ConnectionPool>, Arc<MappedDialer>) {
    let ips: Vec<IpAddr> = (1..=n).map(fake_ip).collect();
    let dialer = Arc::new(MappedDialer::new());
    for ip in &ips {
        dialer.route(*ip, backend);
    }

    let pool = ConnectionPool::new(
        Target::new("backend.test", FAKE_PORT),
        Arc::new(StaticResolver(ips)),
        Arc::clone(&dialer) as Arc<dyn Dialer>,
        max_redials,
    );
    (Arc::new(pool), dialer)
}
