//! Transport layer error types.
//!
//! Nothing in here is ever handed to the application as an operation result.
//! Inbound problems are dropped and logged; the request they might belong to
//! keeps running on its retransmission budget.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use super::frame::MsgType;

/// Errors from decoding or encoding a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the smallest possible header.
    #[error("frame too short")]
    TooShort,

    /// Length field disagrees with the datagram size.
    #[error("declared length {declared} does not match buffer of {actual} bytes")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// 3-byte length form used for a frame that fits the 1-byte form.
    #[error("extended length used for a short frame")]
    NonCanonicalLength,

    /// Type octet is not a known message type.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),

    /// Body does not match the layout of its message type.
    #[error("malformed {msg_type}: {reason}")]
    Malformed {
        /// Type of the offending frame.
        msg_type: MsgType,
        /// What was wrong.
        reason: &'static str,
    },

    /// Client id or topic name is not UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// CONNECT with a protocol id other than 0x01.
    #[error("unsupported protocol id {0:#04x}")]
    UnsupportedProtocol(u8),

    /// Message does not fit in the largest frame.
    #[error("frame of {0} bytes exceeds maximum size")]
    TooLarge(usize),
}

impl FrameError {
    /// True when the type octet was unrecognized, as opposed to a damaged body.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

/// Errors handling an inbound datagram.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame could not be decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error on the socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Acknowledgment with no matching pending request.
    #[error("unexpected {msg_type} for {key}")]
    UnexpectedAck {
        /// Type of the acknowledgment.
        msg_type: MsgType,
        /// Correlation key it carried.
        key: String,
    },

    /// Message not valid in the current session state.
    #[error("unexpected {0}")]
    UnexpectedMessage(MsgType),

    /// Datagram from an address other than the current gateway.
    #[error("datagram from unknown source {0}")]
    ForeignSource(SocketAddr),
}

impl TransportError {
    /// True for errors that are dropped without touching session state.
    ///
    /// Covers malformed frames and protocol violations such as stale or
    /// duplicate acknowledgments.
    pub fn is_silent_drop(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
