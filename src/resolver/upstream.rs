//! Plain UDP resolution across an ordered upstream chain.

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::{MAX_UDP_MESSAGE_SIZE, UPSTREAM_TIMEOUT};
use crate::dns::{Reply, build_query, parse_reply};
use crate::domain::DomainName;
use crate::error::{ResolveError, WireError};

/// A single type-A query against a single upstream.
///
/// `Ok` means a well-formed reply arrived (transport success), whether or not
/// it carries any A records.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, name: &DomainName, upstream: &str) -> Result<Reply, ResolveError>;
}

/// `Exchange` over a fresh UDP socket per query.
pub struct UdpExchange {
    timeout: Duration,
}

impl UdpExchange {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for UdpExchange {
    fn default() -> Self {
        Self::new(UPSTREAM_TIMEOUT)
    }
}

#[async_trait]
impl Exchange for UdpExchange {
    async fn exchange(&self, name: &DomainName, upstream: &str) -> Result<Reply, ResolveError> {
        let io_err = |source| ResolveError::Io {
            upstream: upstream.to_string(),
            source,
        };

        let addr = tokio::net::lookup_host(upstream)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ResolveError::BadUpstream(upstream.to_string()))?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(io_err)?;
        socket.connect(addr).await.map_err(io_err)?;

        let id = rand::random::<u16>();
        socket.send(&build_query(id, name)).await.map_err(io_err)?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_UDP_MESSAGE_SIZE];
        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(result) => result.map_err(io_err)?,
                Err(_) => return Err(ResolveError::Timeout(upstream.to_string())),
            };

            match parse_reply(id, &buf[..len]) {
                Ok(reply) => return Ok(reply),
                // Late answer to an earlier query on a reused port.
                Err(WireError::IdMismatch { .. }) => continue,
                Err(source) => {
                    return Err(ResolveError::Malformed {
                        upstream: upstream.to_string(),
                        source,
                    });
                }
            }
        }
    }
}

/// Walks an upstream list in order; the first transport success wins.
///
/// Each upstream is tried once. A reply with no A records still ends the
/// walk: it is a valid negative answer, not a failure.
pub struct UpstreamResolver {
    exchange: Arc<dyn Exchange>,
    verbose: bool,
}

impl UpstreamResolver {
    pub fn new(exchange: Arc<dyn Exchange>, verbose: bool) -> Self {
        Self { exchange, verbose }
    }

    /// Resolve `name` against `upstreams`, returning A records in reply order.
    pub async fn resolve(&self, name: &DomainName, upstreams: &[String]) -> Vec<Ipv4Addr> {
        if upstreams.is_empty() {
            warn!("no upstreams configured for {}", name);
            return Vec::new();
        }

        for (i, upstream) in upstreams.iter().enumerate() {
            match self.exchange.exchange(name, upstream).await {
                Ok(reply) => {
                    if self.verbose {
                        info!("udp[{}] {} -> {:?}", upstream, name, reply.addrs);
                    }
                    return reply.addrs;
                }
                Err(e) if i == upstreams.len() - 1 => {
                    warn!("error querying {} from upstreams: {}", name, e);
                }
                Err(e) => {
                    debug!("upstream {} failed for {}: {}", upstream, name, e);
                }
            }
        }

        Vec::new()
    }
}
