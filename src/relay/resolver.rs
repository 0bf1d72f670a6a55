// ABOUTME: Hostname resolution for the connection pool
// ABOUTME: Resolver trait plus a DNS-backed implementation using tokio's lookup_host

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while resolving the target host
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup itself failed
    #[error("Failed to resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The lookup succeeded but returned nothing
    #[error("No addresses found for {host}")]
    NoAddresses { host: String },
}

/// Turns a hostname into the ordered set of IPs the pool should dial.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to one or more IP addresses, without duplicates.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// System resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        // Port is irrelevant here, the pool pairs each IP with the target port
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?;

        let ips = dedup_ordered(addrs.map(|addr| addr.ip()));
        if ips.is_empty() {
            return Err(ResolveError::NoAddresses {
                host: host.to_string(),
            });
        }

        debug!(host = host, count = ips.len(), "Resolved host");
        Ok(ips)
    }
}

/// Drop repeated addresses while keeping first-seen order.
///
/// `getaddrinfo` returns one entry per socket type, so the same IP
/// usually shows up more than once.
pub(crate) fn dedup_ordered(ips: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut out: Vec<IpAddr> = Vec::new();
    for ip in ips {
        if !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let c = IpAddr::V6(Ipv6Addr::LOCALHOST);

        assert_eq!(dedup_ordered([a, b, a, c, b]), vec![a, b, c]);
        assert!(dedup_ordered(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_dns_resolver_ip_literal() {
        let ips = DnsResolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn test_dns_resolver_localhost_is_loopback() {
        let ips = DnsResolver.resolve("localhost").await.unwrap();
        assert!(!ips.is_empty());
        assert!(ips.iter().all(IpAddr::is_loopback));
    }

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::NoAddresses {
            host: "example.invalid".to_string(),
        };
        assert_eq!(err.to_string(), "No addresses found for example.invalid");

        let err = ResolveError::Lookup {
            host: "example.invalid".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        };
        assert!(err.to_string().contains("Failed to resolve example.invalid"));
    }
}
