//! UDP transport for DNS queries.
//!
//! Every datagram is decoded and answered on its own task, so a slow upstream
//! for one client never holds up the others. Undecodable datagrams are
//! dropped without a reply.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::bind_reusable_udp;
use crate::config::MAX_UDP_MESSAGE_SIZE;
use crate::dns::DnsRequest;
use crate::handler::QueryHandler;

/// UDP transport for the resolver.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket on `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::from_std(bind_reusable_udp(addr)?)?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start serving; the returned task runs until aborted.
    pub fn start(self, handler: QueryHandler) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, handler))
    }
}

async fn run(socket: Arc<UdpSocket>, handler: QueryHandler) {
    let mut buf = vec![0u8; MAX_UDP_MESSAGE_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("UDP recv error: {}", e);
                continue;
            }
        };

        let Some(request) = DnsRequest::parse(&buf[..len]) else {
            debug!("dropping malformed {} byte datagram from {}", len, src);
            continue;
        };

        let socket = Arc::clone(&socket);
        let handler = handler.clone();
        tokio::spawn(async move {
            let response = handler.handle(&request).await;
            if let Err(e) = socket.send_to(&response.to_bytes(), src).await {
                warn!("UDP response error to {}: {}", src, e);
            }
        });
    }
}
