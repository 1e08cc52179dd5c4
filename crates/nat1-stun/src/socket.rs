//! Socket construction with address/port reuse.
//!
//! The STUN probe, the loopback reachability test and the forwarders all bind
//! the same local port one after another (and sometimes at the same time), so
//! every socket here is created through `socket2` with `SO_REUSEADDR` and,
//! where available, `SO_REUSEPORT`.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::{TcpListener, TcpSocket, UdpSocket};

/// Listen backlog for forwarding listeners
const LISTEN_BACKLOG: i32 = 1024;

fn reusable(ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, ty, Some(protocol))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn sock_addr(addr: SocketAddrV4) -> SockAddr {
    SocketAddr::V4(addr).into()
}

/// Bind an unconnected TCP socket, ready for `connect`
///
/// # Errors
///
/// Returns the OS error if the socket cannot be created or bound.
pub fn bind_tcp_socket(local: SocketAddrV4) -> io::Result<TcpSocket> {
    let socket = reusable(Type::STREAM, Protocol::TCP)?;
    socket.bind(&sock_addr(local))?;
    Ok(TcpSocket::from_std_stream(socket.into()))
}

/// Bind a listening TCP socket
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns the OS error if the socket cannot be created, bound or put into
/// listening state.
pub fn bind_tcp_listener(local: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = reusable(Type::STREAM, Protocol::TCP)?;
    socket.bind(&sock_addr(local))?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Bind a UDP socket
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns the OS error if the socket cannot be created or bound.
pub fn bind_udp_socket(local: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = reusable(Type::DGRAM, Protocol::UDP)?;
    socket.bind(&sock_addr(local))?;
    UdpSocket::from_std(socket.into())
}

/// Check that `local` can be bound for both TCP and UDP
///
/// The sockets are closed again immediately.
///
/// # Errors
///
/// Returns the first bind failure.
pub fn check_available(local: SocketAddrV4) -> io::Result<()> {
    for (ty, protocol) in [(Type::STREAM, Protocol::TCP), (Type::DGRAM, Protocol::UDP)] {
        let socket = reusable(ty, protocol)?;
        socket.bind(&sock_addr(local))?;
    }
    Ok(())
}
