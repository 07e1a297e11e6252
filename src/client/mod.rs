//! Async client driver.
//!
//! Runs the sans-IO [`Session`](crate::session::Session) on a tokio task with a
//! UDP socket, and supplies reconnection policies for lost sessions.

#[allow(clippy::module_inception)]
mod client;
mod reconnect;

pub use client::*;
pub use reconnect::*;
