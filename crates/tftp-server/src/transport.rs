//! Datagram transport seam.
//!
//! The dispatcher only needs two things from the network: a way to open a
//! per-transfer endpoint talking to one client, and that endpoint's
//! send/receive primitives. Both are traits so tests can swap in the
//! in-memory [`MockTransport`](crate::mock::MockTransport).

use crate::buffer::Datagram;
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram read in one call. Comfortably above a full DATA packet
/// and a request carrying option extensions.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// A datagram endpoint bound to a single remote peer.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Sends one datagram to the peer.
    async fn send(&self, packet: &[u8]) -> io::Result<()>;

    /// Waits for the next datagram from the peer.
    async fn recv(&self) -> io::Result<Datagram>;

    /// Address of the connected peer.
    fn peer_addr(&self) -> SocketAddr;
}

/// Factory for per-transfer endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a fresh endpoint connected to `peer`.
    async fn open(&self, peer: SocketAddr) -> io::Result<Box<dyn Endpoint>>;
}

/// Transport backed by tokio UDP sockets.
///
/// Each transfer gets its own socket on an ephemeral port, connected to the
/// client so the kernel drops datagrams from any other transfer ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    async fn open(&self, peer: SocketAddr) -> io::Result<Box<dyn Endpoint>> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Box::new(UdpEndpoint { socket, peer }))
    }
}

/// Connected UDP socket for one transfer.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpEndpoint {
    /// Local address of the transfer socket (the server's transfer ID).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Endpoint for UdpEndpoint {
    async fn send(&self, packet: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(packet).await?;
        if sent != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {sent} of {} bytes", packet.len()),
            ));
        }
        Ok(())
    }

    async fn recv(&self) -> io::Result<Datagram> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(Datagram::new(buf))
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
