use std::io;
use std::net::{SocketAddrV4, UdpSocket as StdUdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Creates the non-blocking socket the mDNS relay listens on.
pub fn create_socket(addr: &SocketAddrV4) -> io::Result<UdpSocket> {
    let udp = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    udp.set_nonblocking(true)?;

    // 1MB
    let size = 1024 * 1024;
    udp.set_recv_buffer_size(size)?;
    udp.set_send_buffer_size(size)?;

    // The responder we relay for may live on this very host.
    udp.set_multicast_loop_v4(true)?;
    udp.set_multicast_ttl_v4(255)?;

    udp.bind(&(*addr).into())?;

    UdpSocket::from_std(udp.into())
}

/// Creates a blocking socket on a local port that other sockets (and the
/// streaming host itself) may share.
pub fn create_shared_socket(addr: &SocketAddrV4) -> io::Result<StdUdpSocket> {
    let udp = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    udp.set_reuse_address(true)?;
    #[cfg(unix)]
    udp.set_reuse_port(true)?;

    udp.bind(&(*addr).into())?;

    Ok(udp.into())
}
