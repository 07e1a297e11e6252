//! Async UDP socket for MQTT-SN.
//!
//! Wraps a tokio [`UdpSocket`] with a receive buffer, multicast membership
//! and a [`Transport`] implementation the session engine can flush into.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::SockRef;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::core::Transport;
use crate::core::constants::DEFAULT_RECV_BUFFER_SIZE;

/// Async UDP socket for talking to gateways.
#[derive(Debug)]
pub struct MqttsnSocket {
    /// The underlying UDP socket.
    socket: UdpSocket,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
}

impl MqttsnSocket {
    /// Bind a socket to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        MqttsnSocketBuilder::new().bind(addr).await
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        MqttsnSocketBuilder::new().from_socket(socket)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a datagram, waiting for socket capacity.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Receive a datagram and return the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Join a multicast group on the default interface.
    pub fn join_group(&self, group: IpAddr) -> io::Result<()> {
        match group {
            IpAddr::V4(addr) => self.socket.join_multicast_v4(addr, Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(addr) => self.socket.join_multicast_v6(&addr, 0)?,
        }
        debug!(%group, "joined multicast group");
        Ok(())
    }

    /// Set the hop limit for outgoing multicast datagrams.
    pub fn set_multicast_hops(&self, hops: u8) -> io::Result<()> {
        let sock = SockRef::from(&self.socket);
        if self.local_addr()?.is_ipv6() {
            sock.set_multicast_hops_v6(u32::from(hops))
        } else {
            sock.set_multicast_ttl_v4(u32::from(hops))
        }
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Transport for MqttsnSocket {
    fn send(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        self.socket.try_send_to(bytes, dest).map(|_| ())
    }

    fn join_multicast(&mut self, group: IpAddr) -> io::Result<()> {
        self.join_group(group)
    }

    fn set_multicast_hops(&mut self, hops: u8) -> io::Result<()> {
        MqttsnSocket::set_multicast_hops(self, hops)
    }
}

/// Builder for sockets with custom options.
#[derive(Debug, Clone)]
pub struct MqttsnSocketBuilder {
    recv_buffer_size: usize,
}

impl Default for MqttsnSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttsnSocketBuilder {
    /// Create a socket builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Bind to the given address and create a socket.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<MqttsnSocket> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.from_socket(socket))
    }

    /// Create a socket from an existing UDP socket.
    pub fn from_socket(self, socket: UdpSocket) -> MqttsnSocket {
        MqttsnSocket {
            socket,
            recv_buffer: vec![0u8; self.recv_buffer_size],
        }
    }
}
