//! Message struct and the frame codec.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use harp_client::protocol::{decode_frame, ElementType, Message, MessageType, PayloadType};
//! use bytes::Bytes;
//!
//! let message = Message::new(
//!     33,
//!     MessageType::Write,
//!     PayloadType::new(ElementType::S32),
//!     Bytes::copy_from_slice(&(-150i32).to_le_bytes()),
//!     None,
//! ).unwrap();
//!
//! let frame = message.encode();
//! let decoded = decode_frame(&frame).unwrap();
//! assert_eq!(decoded.address(), 33);
//! assert_eq!(decoded.payload::<i32>().unwrap(), -150);
//! ```

use bytes::Bytes;

use super::wire_format::{
    checksum, MessageType, PayloadType, Timestamp, CHECKSUM_SIZE, FRAME_PREFIX_SIZE,
    HEADER_FIELDS_SIZE, MIN_FRAME_SIZE, MIN_LENGTH, PREAMBLE, TIMESTAMP_SIZE,
};
use crate::error::{HarpError, Result};

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    address: u8,
    message_type: MessageType,
    payload_type: PayloadType,
    payload: Bytes,
    timestamp: Option<Timestamp>,
}

impl Message {
    /// Create a message, validating the payload length.
    ///
    /// The timestamp flag of `payload_type` is derived from `timestamp`.
    pub fn new(
        address: u8,
        message_type: MessageType,
        payload_type: PayloadType,
        payload: Bytes,
        timestamp: Option<Timestamp>,
    ) -> Result<Self> {
        let payload_type = if timestamp.is_some() {
            payload_type.with_timestamp()
        } else {
            payload_type.without_timestamp()
        };
        validate_payload_length(message_type, payload_type, payload.len())?;
        Ok(Self {
            address,
            message_type,
            payload_type,
            payload,
            timestamp,
        })
    }

    /// Read request for a register (empty payload).
    pub fn read_request(address: u8, payload_type: PayloadType) -> Self {
        Self {
            address,
            message_type: MessageType::Read,
            payload_type: payload_type.without_timestamp(),
            payload: Bytes::new(),
            timestamp: None,
        }
    }

    /// Register address.
    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[inline]
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Number of payload elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.payload.len() / self.payload_type.element_size()
    }

    #[inline]
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Check if this is an error-class reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.message_type.is_error()
    }

    /// Check if this is an unsolicited event.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.message_type == MessageType::Event
    }

    /// Size of the encoded frame in bytes.
    pub fn frame_len(&self) -> usize {
        FRAME_PREFIX_SIZE + self.length_field()
    }

    /// Checksum byte the encoded frame carries.
    pub fn checksum(&self) -> u8 {
        let frame = self.encode();
        frame[frame.len() - 1]
    }

    fn length_field(&self) -> usize {
        let ts = if self.timestamp.is_some() {
            TIMESTAMP_SIZE
        } else {
            0
        };
        HEADER_FIELDS_SIZE + self.payload.len() + ts + CHECKSUM_SIZE
    }

    /// Encode into a complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.frame_len());
        buf.push(PREAMBLE);
        // Fits: validated at construction.
        buf.push(self.length_field() as u8);
        buf.push(self.address);
        buf.push(self.message_type.to_byte());
        buf.push(self.payload_type.to_byte());
        buf.extend_from_slice(&self.payload);
        if let Some(ts) = self.timestamp {
            buf.extend_from_slice(&ts.to_le_bytes());
        }
        buf.push(checksum(&buf));
        buf
    }
}

/// Encode a frame from its parts.
///
/// Fails with `InvalidPayloadLength` if the payload is not a whole number of
/// elements or does not fit a frame.
pub fn encode_frame(
    address: u8,
    message_type: MessageType,
    payload_type: PayloadType,
    payload: &[u8],
    timestamp: Option<Timestamp>,
) -> Result<Vec<u8>> {
    let message = Message::new(
        address,
        message_type,
        payload_type,
        Bytes::copy_from_slice(payload),
        timestamp,
    )?;
    Ok(message.encode())
}

/// Decode exactly one frame.
///
/// The slice must hold the whole frame and nothing else. Never panics:
/// malformed input always yields an error.
pub fn decode_frame(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(HarpError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the {MIN_FRAME_SIZE}-byte minimum",
            bytes.len()
        )));
    }

    let length = bytes[1] as usize;
    if length < MIN_LENGTH {
        return Err(HarpError::MalformedFrame(format!(
            "length field {length} is below the minimum {MIN_LENGTH}"
        )));
    }
    if FRAME_PREFIX_SIZE + length != bytes.len() {
        return Err(HarpError::MalformedFrame(format!(
            "length field declares {} bytes, {} available",
            FRAME_PREFIX_SIZE + length,
            bytes.len()
        )));
    }

    let (body, tail) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let expected = checksum(body);
    let actual = tail[0];
    if expected != actual {
        return Err(HarpError::ChecksumMismatch { expected, actual });
    }

    if bytes[0] != PREAMBLE {
        return Err(HarpError::MalformedFrame(format!(
            "bad preamble {:#04x}",
            bytes[0]
        )));
    }

    let address = bytes[2];
    let message_type = MessageType::from_byte(bytes[3]).ok_or_else(|| {
        HarpError::MalformedFrame(format!("unknown message type {:#04x}", bytes[3]))
    })?;
    let payload_type = PayloadType::from_byte(bytes[4]).ok_or_else(|| {
        HarpError::MalformedFrame(format!("unknown payload type {:#04x}", bytes[4]))
    })?;

    let data = &body[FRAME_PREFIX_SIZE + HEADER_FIELDS_SIZE..];
    let (payload, timestamp) = if payload_type.timestamped {
        if data.len() < TIMESTAMP_SIZE {
            return Err(HarpError::MalformedFrame(
                "timestamp flag set but frame too short for a timestamp".to_string(),
            ));
        }
        let (payload, ts) = data.split_at(data.len() - TIMESTAMP_SIZE);
        let mut raw = [0u8; TIMESTAMP_SIZE];
        raw.copy_from_slice(ts);
        (payload, Some(Timestamp::from_le_bytes(raw)))
    } else {
        (data, None)
    };

    if let Err(err) = validate_payload_length(message_type, payload_type, payload.len()) {
        return Err(HarpError::MalformedFrame(err.to_string()));
    }

    Ok(Message {
        address,
        message_type,
        payload_type,
        payload: Bytes::copy_from_slice(payload),
        timestamp,
    })
}

fn validate_payload_length(
    message_type: MessageType,
    payload_type: PayloadType,
    len: usize,
) -> Result<()> {
    let invalid = || HarpError::InvalidPayloadLength { payload_type, len };

    let ts = if payload_type.timestamped {
        TIMESTAMP_SIZE
    } else {
        0
    };
    if HEADER_FIELDS_SIZE + len + ts + CHECKSUM_SIZE > u8::MAX as usize {
        return Err(invalid());
    }
    if len % payload_type.element_size() != 0 {
        return Err(invalid());
    }
    // Only read requests and error replies may be empty.
    if len == 0
        && !matches!(
            message_type,
            MessageType::Read | MessageType::ReadError | MessageType::WriteError
        )
    {
        return Err(invalid());
    }
    Ok(())
}
