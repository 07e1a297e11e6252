//! MQTT-SN transport layer.
//!
//! - **Wire codec**: [`Message`] with [`Message::encode`] / [`Message::decode`]
//! - **Retransmission**: [`RetransmitTimers`] with fixed-interval bounded retries
//! - **Keep-alive**: [`KeepAlive`] PINGREQ scheduling and loss detection
//! - **Async sockets**: [`MqttsnSocket`] wrapper for tokio UDP (requires `client`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Async client driver              │
//! ├─────────────────────────────────────────┤
//! │        Session state machine            │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   codec, timers, keep-alive, socket     │
//! ├─────────────────────────────────────────┤
//! │        UDP / mesh datagrams             │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod frame;
mod timing;

#[cfg(feature = "client")]
mod socket;

pub use error::*;
pub use frame::*;
pub use timing::*;

#[cfg(feature = "client")]
pub use socket::*;
