//! Protocol constants and client defaults for MQTT-SN v1.2.
//!
//! Wire values are fixed by the protocol and MUST NOT be changed. The defaults
//! below are what a client uses when the host does not configure otherwise.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Protocol identifier carried in CONNECT.
pub const PROTOCOL_ID: u8 = 0x01;

/// First length octet announcing the 3-byte length form.
pub const EXTENDED_LENGTH_MARKER: u8 = 0x01;

/// Header size with the 1-byte length form (length + type).
pub const SHORT_HEADER_SIZE: usize = 2;

/// Header size with the 3-byte length form (marker + u16 length + type).
pub const LONG_HEADER_SIZE: usize = 4;

/// Largest frame the 1-byte length form can describe.
pub const MAX_SHORT_FRAME_SIZE: usize = 255;

/// Largest frame the 3-byte length form can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Client identifiers are 1 to 23 bytes.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Topic id 0x0000 is reserved and never assigned by a gateway.
pub const RESERVED_TOPIC_ID: u16 = 0x0000;

/// Message id 0x0000 is never used as a correlation key.
pub const RESERVED_MSG_ID: u16 = 0x0000;

/// Longest retransmission timeout a session accepts.
pub const MAX_RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(u16::MAX as u64);

/// Largest keep-alive margin a session accepts.
pub const MAX_KEEP_ALIVE_MARGIN: f64 = 16.0;

// =============================================================================
// CLIENT DEFAULTS
// =============================================================================

/// Keep-alive interval announced in CONNECT.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Retransmissions before a request fails with a timeout.
pub const DEFAULT_RETRANSMISSION_COUNT: u8 = 3;

/// Fixed interval between retransmissions.
pub const DEFAULT_RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Factor applied to the keep-alive interval while waiting for PINGRESP.
pub const DEFAULT_KEEP_ALIVE_MARGIN: f64 = 1.0;

/// UDP port gateways listen on by convention.
pub const DEFAULT_GATEWAY_PORT: u16 = 10000;

/// Hop radius for SEARCHGW.
pub const DEFAULT_SEARCH_RADIUS: u8 = 8;

/// Site-local all-nodes group used for gateway discovery on mesh networks.
pub const DEFAULT_DISCOVERY_GROUP: IpAddr = IpAddr::V6(Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 1));

/// How long the async driver collects GWINFO before giving up on a search.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the async driver advances the timers.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Receive buffer for one datagram.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1500;

/// Inbound publishes buffered for the application before the gateway is told
/// to back off.
pub const DEFAULT_INBOUND_QUEUE: usize = 32;
