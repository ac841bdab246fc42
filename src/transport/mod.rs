//! Transport layer for the DNS server.
//!
//! Only UDP is served. Sockets are bound with address and port reuse so
//! several processes can share the listening port where the platform allows.

pub mod udp;

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;

use crate::config::MAX_UDP_MESSAGE_SIZE;

/// Bind a non-blocking UDP socket with `SO_REUSEADDR` and, on unix,
/// `SO_REUSEPORT`.
pub fn bind_reusable_udp(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuse_port(true)?;
    // Best effort; the kernel may clamp it.
    let _ = socket.set_recv_buffer_size(MAX_UDP_MESSAGE_SIZE);
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
