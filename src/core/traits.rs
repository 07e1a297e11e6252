//! Seams between the protocol engine and its host.
//!
//! The engine never touches a socket or a clock itself. It talks to the
//! network through [`Transport`], hands inbound messages to a
//! [`PublishHandler`], lets a [`GatewaySelector`] pick among discovered
//! gateways, and leaves reconnection cadence to a [`ReconnectPolicy`].

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::transport::{QoS, ReturnCode, TopicIdType};

/// Datagram transport below the engine.
///
/// Sends are non-blocking and best-effort. A failed send is treated like a
/// lost datagram: the retransmission timers take care of it.
pub trait Transport {
    /// Send one datagram to `dest`.
    fn send(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<()>;

    /// Join a multicast group used for gateway discovery and advertisements.
    fn join_multicast(&mut self, group: IpAddr) -> io::Result<()> {
        let _ = group;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "multicast not supported by this transport",
        ))
    }

    /// Set the hop limit for the next multicast sends.
    ///
    /// Transports without a notion of hops ignore it.
    fn set_multicast_hops(&mut self, hops: u8) -> io::Result<()> {
        let _ = hops;
        Ok(())
    }
}

impl Transport for Vec<(SocketAddr, Vec<u8>)> {
    fn send(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        self.push((dest, bytes.to_vec()));
        Ok(())
    }
}

/// A PUBLISH delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    /// Topic id as carried on the wire. For short topics this holds the two
    /// name bytes.
    pub topic_id: u16,
    /// How `topic_id` is to be read.
    pub topic_id_type: TopicIdType,
    /// Topic name, when the id is bound in the registry or the topic is short.
    pub topic_name: Option<String>,
    /// Message payload.
    pub payload: Vec<u8>,
    /// Delivery QoS.
    pub qos: QoS,
    /// Retained message.
    pub retain: bool,
    /// Redelivery flag set by the gateway.
    pub dup: bool,
}

/// Application hook for inbound publishes.
///
/// The returned code is what the gateway sees in PUBACK (or, for QoS 2,
/// whether PUBREC is sent at all).
pub trait PublishHandler {
    /// Handle one inbound message.
    fn on_publish(&mut self, publish: &InboundPublish) -> ReturnCode;
}

impl<F> PublishHandler for F
where
    F: FnMut(&InboundPublish) -> ReturnCode,
{
    fn on_publish(&mut self, publish: &InboundPublish) -> ReturnCode {
        self(publish)
    }
}

/// Handler that accepts and discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PublishHandler for AcceptAll {
    fn on_publish(&mut self, _publish: &InboundPublish) -> ReturnCode {
        ReturnCode::Accepted
    }
}

/// A gateway found through GWINFO or ADVERTISE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayInfo {
    /// Gateway id from the frame.
    pub gateway_id: u8,
    /// Where to send CONNECT.
    pub address: SocketAddr,
}

/// Picks the gateway that ends a search.
pub trait GatewaySelector {
    /// Called for every GWINFO received during a search.
    ///
    /// `seen` holds all earlier candidates of the same search. Return true to
    /// end the search with `candidate`.
    fn select(&mut self, candidate: &GatewayInfo, seen: &[GatewayInfo]) -> bool;
}

impl<F> GatewaySelector for F
where
    F: FnMut(&GatewayInfo, &[GatewayInfo]) -> bool,
{
    fn select(&mut self, candidate: &GatewayInfo, seen: &[GatewayInfo]) -> bool {
        self(candidate, seen)
    }
}

/// Ends the search with the first gateway that answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstResponder;

impl GatewaySelector for FirstResponder {
    fn select(&mut self, _candidate: &GatewayInfo, _seen: &[GatewayInfo]) -> bool {
        true
    }
}

/// Reconnection cadence after a session is lost.
pub trait ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (starting at 1), or
    /// `None` to give up.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called once a reconnect succeeds.
    fn reset(&mut self) {}
}
