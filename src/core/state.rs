//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// DISCONNECTED ──search──► SEARCHING ──gwinfo──► DISCONNECTED
///      │                       │
///      └────────connect────────┴──► CONNECTING ──connack──► CONNECTED
///                                        │                     │
///                      rejected/timeout ◄┘   keep-alive lost ──┴──► LOST
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No gateway association. Initial state.
    #[default]
    Disconnected,
    /// Gateway discovery in progress.
    Searching,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// Session active.
    Connected,
    /// Keep-alive expired. The session ended without being asked to.
    Lost,
}

impl SessionState {
    /// Returns true if requests can be issued.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Returns true if a new connect may be started from this state.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Searching | Self::Lost)
    }

    /// Returns true if a gateway search may be started from this state.
    pub fn can_search(self) -> bool {
        matches!(self, Self::Disconnected | Self::Searching | Self::Lost)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Searching => "searching",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}
