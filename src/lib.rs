//! # mqttsn-client
//!
//! Client side of **MQTT-SN** v1.2, the publish/subscribe protocol for
//! sensor networks carried over UDP and other unreliable datagram links.
//!
//! The protocol engine is a sans-IO state machine: it never touches a socket
//! or a clock, so it runs the same under tokio, on a bare event loop, or in a
//! test with synthetic time. It provides:
//!
//! - **Sessions**: CONNECT with optional will, keep-alive, loss detection
//! - **Reliability**: per-request retransmission with a fixed retry budget
//! - **Topics**: registration, predefined and short topics, subscriptions
//! - **Discovery**: SEARCHGW/GWINFO with a pluggable gateway selector, ADVERTISE
//!
//! ## Feature Flags
//!
//! - `client` (default): async driver on a tokio UDP socket, reconnect policies
//!
//! ## Modules
//!
//! - [`core`]: seam traits, constants and error types
//! - [`transport`]: wire codec, retransmission and keep-alive timing, UDP socket
//! - [`session`]: the protocol engine
//! - [`client`]: async driver (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use mqttsn_client::prelude::*;
//!
//! let gateway = "127.0.0.1:10000".parse().unwrap();
//! let mut session = Session::new();
//! let mut connected = session.connect(ConnectConfig::new("sensor-1", gateway)?, Instant::now());
//!
//! // Hand the CONNECT to any datagram transport
//! let mut wire: Vec<(std::net::SocketAddr, Vec<u8>)> = Vec::new();
//! session.flush(&mut wire);
//! assert_eq!(decode(&wire[0].1)?.msg_type(), MsgType::Connect);
//!
//! // The gateway answers
//! let connack = encode(&Message::ConnAck { return_code: ReturnCode::Accepted })?;
//! session.handle_datagram(Instant::now(), gateway, &connack)?;
//! assert_eq!(connected.try_outcome(), Some(Ok(())));
//! assert_eq!(session.state(), SessionState::Connected);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire format and timing
pub mod transport;

// Protocol engine
pub mod session;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::session::{
        Completion, ConnectConfig, Event, Outcome, Session, Subscription, Topic, TopicFilter,
        Will,
    };

    pub use crate::transport::{
        Flags, Message, MsgType, QoS, ReturnCode, TopicIdType, TransportError, TransportResult,
        decode, encode,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{
        ExponentialBackoff, FixedInterval, MessageReceiver, MqttsnClient, MqttsnClientBuilder,
    };

    #[cfg(feature = "client")]
    pub use crate::transport::MqttsnSocket;
}

// Re-export commonly used items at crate root
pub use core::{ClientError, DisconnectReason, RequestError, SessionState};
pub use session::{Completion, ConnectConfig, Session};
pub use transport::{Message, QoS, ReturnCode};

#[cfg(feature = "client")]
pub use client::{MqttsnClient, MqttsnClientBuilder};
