//! Error types for MQTT-SN client operations.
//!
//! Wire and datagram errors live in [`crate::transport`]; the types here are
//! what the application sees.

use std::time::Duration;

use thiserror::Error;

use super::state::SessionState;
use crate::transport::ReturnCode;

/// Why a session ended, or why an operation could not be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// No session with a gateway exists.
    NotConnected,
    /// The application asked to disconnect.
    Client,
    /// The gateway sent DISCONNECT.
    Server,
    /// No PINGRESP arrived in time and the session was declared lost.
    KeepAliveTimeout,
    /// A newer request of the same kind replaced this one.
    Superseded,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NotConnected => "not connected",
            Self::Client => "disconnected by client",
            Self::Server => "disconnected by gateway",
            Self::KeepAliveTimeout => "keep-alive timeout",
            Self::Superseded => "superseded",
        };
        f.write_str(text)
    }
}

/// Failure of a single client operation.
///
/// Every request resolves exactly once, either with its value or with one of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The gateway declined the request.
    #[error("rejected by gateway: {0}")]
    Rejected(ReturnCode),

    /// Retransmissions exhausted with no acknowledgment.
    #[error("no response from gateway")]
    Timeout,

    /// The session is gone or went away while the request was pending.
    #[error("disconnected: {0}")]
    Disconnected(DisconnectReason),

    /// Publish on a topic id that is not registered in the current session.
    #[error("topic id {0:#06x} is not registered in this session")]
    UnregisteredTopic(u16),

    /// The operation is not allowed in the current session state.
    #[error("operation not allowed while {0}")]
    InvalidState(SessionState),

    /// The request could not be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// All message ids are in use.
    #[error("too many requests in flight")]
    TooManyInFlight,
}

impl RequestError {
    /// Returns true if the gateway answered with "invalid topic id".
    ///
    /// The caller should register the topic again before retrying.
    pub fn needs_registration(&self) -> bool {
        matches!(
            self,
            Self::UnregisteredTopic(_) | Self::Rejected(ReturnCode::InvalidTopicId)
        )
    }
}

/// Invalid connect or client configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Client id is empty.
    #[error("client id must not be empty")]
    EmptyClientId,

    /// Client id does not fit the protocol limit.
    #[error("client id is {len} bytes, at most {max} allowed")]
    ClientIdTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Protocol limit.
        max: usize,
    },

    /// Keep-alive does not fit the 16-bit seconds field.
    #[error("keep-alive of {0} seconds does not fit the CONNECT duration field")]
    KeepAliveTooLong(u64),

    /// Keep-alive is shorter than the one-second resolution of CONNECT.
    #[error("keep-alive of {0:?} is below one second")]
    KeepAliveTooShort(Duration),

    /// Retransmission timeout is zero.
    #[error("retransmission timeout must be non-zero")]
    ZeroRetransmissionTimeout,

    /// Retransmission timeout is above the supported maximum.
    #[error("retransmission timeout of {0:?} is too long")]
    RetransmissionTimeoutTooLong(Duration),

    /// Keep-alive margin is not in `(0, MAX_KEEP_ALIVE_MARGIN]`.
    #[error("keep-alive margin must be positive and at most 16, got {0}")]
    InvalidKeepAliveMargin(f64),

    /// Gateway address was never set.
    #[error("gateway address is required")]
    MissingGateway,
}

/// Errors from the async client driver.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The operation failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The driver task has stopped.
    #[error("client is closed")]
    Closed,

    /// The request was replaced before it resolved.
    #[error("request abandoned")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        assert_eq!(RequestError::Timeout.to_string(), "no response from gateway");
        assert_eq!(
            RequestError::Disconnected(DisconnectReason::KeepAliveTimeout).to_string(),
            "disconnected: keep-alive timeout"
        );
        assert_eq!(
            RequestError::UnregisteredTopic(7).to_string(),
            "topic id 0x0007 is not registered in this session"
        );
    }

    #[test]
    fn test_needs_registration() {
        assert!(RequestError::UnregisteredTopic(3).needs_registration());
        assert!(RequestError::Rejected(ReturnCode::InvalidTopicId).needs_registration());
        assert!(!RequestError::Rejected(ReturnCode::Congestion).needs_registration());
        assert!(!RequestError::Timeout.needs_registration());
    }

    #[test]
    fn test_client_error_from() {
        let err: ClientError = RequestError::Timeout.into();
        assert!(matches!(err, ClientError::Request(RequestError::Timeout)));

        let err: ClientError = ConfigError::EmptyClientId.into();
        assert_eq!(err.to_string(), "configuration error: client id must not be empty");
    }
}
