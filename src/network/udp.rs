//! UDP socket plumbing
//!
//! Listener sockets are built with `socket2` so they can share their port
//! (`SO_REUSEADDR`) and receive broadcasts. Outbound traffic goes through the
//! [`DatagramSocket`] and [`Connector`] seams so the session logic never
//! touches `std::net` directly.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::NetworkError;

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Something that can send a datagram to an address
pub trait DatagramSocket: Send + Sync {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, dest)
    }
}

/// Opens outbound sockets
pub trait Connector: Send + Sync {
    /// Open a fresh unconnected send socket. `broadcast` enables `SO_BROADCAST`.
    fn open(&self, broadcast: bool) -> io::Result<Arc<dyn DatagramSocket>>;
}

/// Connector backed by real OS sockets bound to an ephemeral port
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    fn open(&self, broadcast: bool) -> io::Result<Arc<dyn DatagramSocket>> {
        let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        Ok(Arc::new(socket))
    }
}

/// Limited broadcast destination for a port
pub fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))
}

/// Create a reusable listener bound to `0.0.0.0:port`
///
/// The read timeout bounds every `recv_from` so the owning loop can observe
/// a stop request.
pub fn bind_listener(port: u16, broadcast: bool, timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let bind_failed = |e: io::Error| NetworkError::BindFailed {
        port,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    if broadcast {
        socket.set_broadcast(true).map_err(bind_failed)?;
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(bind_failed)?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(timeout)).map_err(bind_failed)?;

    Ok(socket)
}

/// Whether a receive error is just the read timeout expiring
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Run `handler` for every datagram arriving on `socket` until `running` clears
///
/// The socket must have a read timeout so the flag is polled.
pub fn spawn_listener<F>(
    name: &str,
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    mut handler: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnMut(&[u8], SocketAddr) + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while running.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((n, source)) => handler(&buf[..n], source),
                Err(e) if is_timeout(&e) => continue,
                // ICMP port-unreachable and friends surface here on some platforms
                Err(e) => tracing::debug!("{}: receive error: {}", thread_name, e),
            }
        }
        tracing::debug!("{} stopped", thread_name);
    })
}

/// Best guess at the address other LAN hosts see us as
///
/// Connecting a UDP socket sends nothing; it only asks the OS which
/// interface would route to the target.
pub fn local_ip() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("10.255.255.255:1")?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
