//! The sans-IO client engine.
//!
//! [`Session`] holds the protocol state of one client: connection state,
//! pending requests with their retransmission timers, topic bindings,
//! keep-alive and gateway discovery. It is driven entirely by the host, which
//! makes it usable from any runtime and testable with synthetic time.

mod completion;
mod config;
mod discovery;
#[allow(clippy::module_inception)]
mod session;
mod topics;

#[cfg(test)]
mod tests;

pub use completion::{Completion, Outcome};
pub use config::{ConnectConfig, ConnectConfigBuilder, Will};
pub use discovery::{Advertisement, Discovery};
pub use session::{Event, PendingKey, Session, Subscription, Transmit};
pub use topics::{Topic, TopicFilter, TopicRegistry};
