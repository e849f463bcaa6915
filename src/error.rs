//! Error types for harp-client.

use thiserror::Error;

use crate::protocol::{MessageType, PayloadType};

/// Main error type for all device operations.
#[derive(Debug, Error)]
pub enum HarpError {
    /// Frame structure is invalid (bad preamble, length, type byte, truncation).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Trailing checksum does not match the sum of the preceding bytes.
    #[error("Checksum mismatch: computed {expected:#04x}, frame carries {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte found at the end of the frame.
        actual: u8,
    },

    /// Payload byte count is not a valid multiple of the element size.
    #[error("Payload of {len} bytes is invalid for payload type {payload_type}")]
    InvalidPayloadLength {
        /// Declared payload type.
        payload_type: PayloadType,
        /// Offending payload length in bytes.
        len: usize,
    },

    /// Message payload does not have the shape the caller asked for.
    #[error("Payload type mismatch: {0}")]
    PayloadTypeMismatch(String),

    /// Address has no entry in the register directory.
    #[error("Unknown register: {0}")]
    UnknownRegister(u8),

    /// Register exists but does not accept writes.
    #[error("Register {0} is read-only")]
    ReadOnlyRegister(u8),

    /// Connected device reported a different identity.
    #[error("Unexpected device identity: expected {expected}, device reported {actual}")]
    UnexpectedDeviceIdentity {
        /// Identity declared for the device type.
        expected: u16,
        /// Identity reported by the device.
        actual: u16,
    },

    /// Device answered a command with an error-class reply.
    #[error("Device rejected {message_type} on register {address}")]
    DeviceRejected {
        /// Register the command targeted.
        address: u8,
        /// Error-class reply type received.
        message_type: MessageType,
    },

    /// I/O error on the underlying transport.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Command was cancelled by the caller.
    #[error("Command cancelled")]
    Cancelled,

    /// No matching reply arrived before the deadline.
    #[error("Command timed out")]
    TimedOut,

    /// Session was closed while the command was pending.
    #[error("Session closed")]
    SessionClosed,

    /// Invalid static configuration (register directory, session settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarpError {
    /// Rebuild a transport error for fan-out to several waiters.
    pub(crate) fn transport_from(err: &std::io::Error) -> Self {
        HarpError::Transport(std::io::Error::new(err.kind(), err.to_string()))
    }
}

/// Result type alias using HarpError.
pub type Result<T> = std::result::Result<T, HarpError>;
