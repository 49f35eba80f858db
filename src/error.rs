//! Error types for halfduplex.

use std::fmt;

use thiserror::Error;

use crate::protocol::{Direction, FrameType, StreamId};
use crate::stream::DirectionState;

/// Main error type for all halfduplex operations.
#[derive(Debug, Error)]
pub enum HalfDuplexError {
    /// Codec-level failure. Connection-fatal: the transport should close.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The two BEGIN frames of a stream carried different authorization tokens.
    #[error("Handshake authorization mismatch on stream {0}")]
    HandshakeAuthorizationMismatch(StreamId),

    /// A frame arrived without extension metadata its direction requires.
    #[error("Missing extension on {frame_type} ({direction})")]
    MissingExtension {
        frame_type: FrameType,
        direction: Direction,
    },

    /// A frame carried extension metadata its direction forbids.
    #[error("Unexpected extension on {frame_type} ({direction})")]
    UnexpectedExtension {
        frame_type: FrameType,
        direction: Direction,
    },

    /// Buffer pool could not satisfy an acquisition.
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// Frame received in a state that forbids it.
    #[error("Protocol violation: {frame_type} not allowed in state {state:?}")]
    ProtocolViolation {
        frame_type: FrameType,
        state: DirectionState,
    },

    /// Operation addressed a stream the coordinator does not know.
    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration loading).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl HalfDuplexError {
    /// Whether the error must tear down the whole transport connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            HalfDuplexError::MalformedFrame(_)
                | HalfDuplexError::Io(_)
                | HalfDuplexError::ConnectionClosed
        )
    }

    /// Direction-level rejection reason, if this error is one.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            HalfDuplexError::HandshakeAuthorizationMismatch(_) => {
                Some(Rejection::AuthorizationMismatch)
            }
            HalfDuplexError::MissingExtension { .. } => Some(Rejection::MissingExtension),
            HalfDuplexError::UnexpectedExtension { .. } => Some(Rejection::UnexpectedExtension),
            HalfDuplexError::OutOfMemory { .. } => Some(Rejection::OutOfMemory),
            HalfDuplexError::ProtocolViolation { .. } => Some(Rejection::ProtocolViolation),
            _ => None,
        }
    }
}

/// Why a direction was driven to a RESET or ABORTED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    MissingExtension,
    UnexpectedExtension,
    ProtocolViolation,
    OutOfMemory,
    AuthorizationMismatch,
    /// RESET received from the reader.
    PeerReset,
    /// RESET requested locally.
    LocalReset,
    /// Peer direction was rejected and the stream policy escalated.
    Escalated,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::MissingExtension => "missing extension",
            Rejection::UnexpectedExtension => "unexpected extension",
            Rejection::ProtocolViolation => "protocol violation",
            Rejection::OutOfMemory => "out of memory",
            Rejection::AuthorizationMismatch => "authorization mismatch",
            Rejection::PeerReset => "peer reset",
            Rejection::LocalReset => "local reset",
            Rejection::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Result type alias using HalfDuplexError.
pub type Result<T> = std::result::Result<T, HalfDuplexError>;
