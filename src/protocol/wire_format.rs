//! Wire format constants and field encodings.
//!
//! Frame layout:
//! ```text
//! ┌──────────┬────────┬─────────┬──────────┬─────────────┬─────────┬──────────────┬──────────┐
//! │ Preamble │ Length │ Address │ Msg Type │ Payload Type│ Payload │ Timestamp    │ Checksum │
//! │ 0xAA     │ 1 byte │ 1 byte  │ 1 byte   │ 1 byte      │ N bytes │ 0 or 8 bytes │ 1 byte   │
//! └──────────┴────────┴─────────┴──────────┴─────────────┴─────────┴──────────────┴──────────┘
//! ```
//!
//! `Length` counts every byte after itself, checksum included.
//! All multi-byte values are Little Endian.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First byte of every frame.
pub const PREAMBLE: u8 = 0xAA;

/// Preamble and length byte.
pub const FRAME_PREFIX_SIZE: usize = 2;

/// Address, message type and payload type.
pub const HEADER_FIELDS_SIZE: usize = 3;

/// Size of the optional timestamp field.
pub const TIMESTAMP_SIZE: usize = 8;

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 1;

/// Smallest legal value of the length byte (no payload, no timestamp).
pub const MIN_LENGTH: usize = HEADER_FIELDS_SIZE + CHECKSUM_SIZE;

/// Smallest complete frame.
pub const MIN_FRAME_SIZE: usize = FRAME_PREFIX_SIZE + MIN_LENGTH;

/// Largest complete frame (length byte saturated).
pub const MAX_FRAME_SIZE: usize = FRAME_PREFIX_SIZE + u8::MAX as usize;

/// Largest payload that fits a frame without a timestamp.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - MIN_LENGTH;

/// Flag constants for the message type and payload type bytes.
pub mod flags {
    /// Message type error flag.
    pub const ERROR: u8 = 0x08;
    /// Payload type: signed integer.
    pub const SIGNED: u8 = 0x80;
    /// Payload type: IEEE float.
    pub const FLOAT: u8 = 0x40;
    /// Payload type: frame carries a timestamp.
    pub const HAS_TIMESTAMP: u8 = 0x10;
    /// Payload type: element size in bytes.
    pub const SIZE_MASK: u8 = 0x0F;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(byte: u8, flag: u8) -> bool {
        byte & flag != 0
    }
}

/// Kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Read request, or the reply carrying the register contents.
    Read = 0x01,
    /// Write request, or its acknowledgement.
    Write = 0x02,
    /// Unsolicited notification from the device.
    Event = 0x03,
    /// Device refused a read.
    ReadError = 0x01 | flags::ERROR,
    /// Device refused a write.
    WriteError = 0x02 | flags::ERROR,
}

impl MessageType {
    /// Parse a message type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Read),
            0x02 => Some(Self::Write),
            0x03 => Some(Self::Event),
            0x09 => Some(Self::ReadError),
            0x0A => Some(Self::WriteError),
            _ => None,
        }
    }

    /// Wire value.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if the error flag is set.
    #[inline]
    pub fn is_error(self) -> bool {
        flags::has_flag(self.to_byte(), flags::ERROR)
    }

    /// Check if this type can answer a command (everything but `Event`).
    #[inline]
    pub fn is_reply_class(self) -> bool {
        self != Self::Event
    }

    /// Command kind this type answers, with the error flag stripped.
    pub fn command_kind(self) -> Self {
        match self {
            Self::Read | Self::ReadError => Self::Read,
            Self::Write | Self::WriteError => Self::Write,
            Self::Event => Self::Event,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Event => "Event",
            Self::ReadError => "ReadError",
            Self::WriteError => "WriteError",
        };
        f.write_str(name)
    }
}

/// Scalar element carried in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    U8 = 0x01,
    S8 = 0x01 | flags::SIGNED,
    U16 = 0x02,
    S16 = 0x02 | flags::SIGNED,
    U32 = 0x04,
    S32 = 0x04 | flags::SIGNED,
    U64 = 0x08,
    S64 = 0x08 | flags::SIGNED,
    Float = 0x04 | flags::FLOAT,
}

impl ElementType {
    /// Parse the element bits of a payload type byte (timestamp flag ignored).
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & !flags::HAS_TIMESTAMP {
            0x01 => Some(Self::U8),
            0x81 => Some(Self::S8),
            0x02 => Some(Self::U16),
            0x82 => Some(Self::S16),
            0x04 => Some(Self::U32),
            0x84 => Some(Self::S32),
            0x08 => Some(Self::U64),
            0x88 => Some(Self::S64),
            0x44 => Some(Self::Float),
            _ => None,
        }
    }

    /// Size of one element in bytes.
    #[inline]
    pub fn size(self) -> usize {
        (self as u8 & flags::SIZE_MASK) as usize
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        flags::has_flag(self as u8, flags::SIGNED)
    }

    #[inline]
    pub fn is_float(self) -> bool {
        flags::has_flag(self as u8, flags::FLOAT)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "U8",
            Self::S8 => "S8",
            Self::U16 => "U16",
            Self::S16 => "S16",
            Self::U32 => "U32",
            Self::S32 => "S32",
            Self::U64 => "U64",
            Self::S64 => "S64",
            Self::Float => "Float",
        };
        f.write_str(name)
    }
}

/// Decoded payload type byte: element kind plus timestamp flag.
///
/// The element count is not encoded here; it follows from the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType {
    /// Element kind.
    pub element: ElementType,
    /// Whether the frame carries a timestamp.
    pub timestamped: bool,
}

impl PayloadType {
    /// Untimestamped payload of the given element kind.
    pub const fn new(element: ElementType) -> Self {
        Self {
            element,
            timestamped: false,
        }
    }

    /// Same element kind with the timestamp flag set.
    pub const fn with_timestamp(self) -> Self {
        Self {
            element: self.element,
            timestamped: true,
        }
    }

    /// Same element kind with the timestamp flag cleared.
    pub const fn without_timestamp(self) -> Self {
        Self::new(self.element)
    }

    /// Parse a payload type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let element = ElementType::from_byte(byte)?;
        Some(Self {
            element,
            timestamped: flags::has_flag(byte, flags::HAS_TIMESTAMP),
        })
    }

    /// Wire value.
    pub fn to_byte(self) -> u8 {
        let ts = if self.timestamped {
            flags::HAS_TIMESTAMP
        } else {
            0
        };
        self.element as u8 | ts
    }

    /// Size of one element in bytes.
    #[inline]
    pub fn element_size(self) -> usize {
        self.element.size()
    }
}

impl From<ElementType> for PayloadType {
    fn from(element: ElementType) -> Self {
        Self::new(element)
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timestamped {
            write!(f, "Timestamped{}", self.element)
        } else {
            write!(f, "{}", self.element)
        }
    }
}

/// Device clock value: 32.32 unsigned fixed point seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    const FRACTION_SCALE: f64 = 4_294_967_296.0;

    /// Create from the raw wire value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Convert from seconds, saturating at the representable range.
    pub fn from_seconds(seconds: f64) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self(0);
        }
        let whole = seconds.trunc();
        if whole >= u32::MAX as f64 + 1.0 {
            return Self(u64::MAX);
        }
        let fraction = ((seconds - whole) * Self::FRACTION_SCALE).round();
        // Rounding can carry into the next whole second.
        let raw = ((whole as u64) << 32).saturating_add(fraction as u64);
        Self(raw)
    }

    /// Seconds as a float.
    pub fn as_seconds(self) -> f64 {
        let whole = (self.0 >> 32) as f64;
        let fraction = (self.0 & 0xFFFF_FFFF) as f64 / Self::FRACTION_SCALE;
        whole + fraction
    }

    /// Little endian wire encoding.
    pub fn to_le_bytes(self) -> [u8; TIMESTAMP_SIZE] {
        self.0.to_le_bytes()
    }

    /// Parse from little endian wire encoding.
    pub fn from_le_bytes(bytes: [u8; TIMESTAMP_SIZE]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

/// Sum of all bytes modulo 256.
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_bytes() {
        assert_eq!(MessageType::Read.to_byte(), 0x01);
        assert_eq!(MessageType::Write.to_byte(), 0x02);
        assert_eq!(MessageType::Event.to_byte(), 0x03);
        assert_eq!(MessageType::ReadError.to_byte(), 0x09);
        assert_eq!(MessageType::WriteError.to_byte(), 0x0A);
    }

    #[test]
    fn test_message_type_from_byte_rejects_unknown() {
        for byte in [0x00, 0x04, 0x08, 0x0B, 0xFF] {
            assert_eq!(MessageType::from_byte(byte), None, "byte {byte:#04x}");
        }
    }

    #[test]
    fn test_message_type_classes() {
        assert!(MessageType::ReadError.is_error());
        assert!(MessageType::WriteError.is_error());
        assert!(!MessageType::Read.is_error());
        assert!(!MessageType::Event.is_reply_class());
        assert!(MessageType::WriteError.is_reply_class());
        assert_eq!(MessageType::ReadError.command_kind(), MessageType::Read);
        assert_eq!(MessageType::WriteError.command_kind(), MessageType::Write);
    }

    #[test]
    fn test_payload_type_bytes() {
        assert_eq!(PayloadType::new(ElementType::U8).to_byte(), 0x01);
        assert_eq!(PayloadType::new(ElementType::S32).to_byte(), 0x84);
        assert_eq!(PayloadType::new(ElementType::Float).to_byte(), 0x44);
        assert_eq!(
            PayloadType::new(ElementType::U16).with_timestamp().to_byte(),
            0x12
        );
        assert_eq!(
            PayloadType::new(ElementType::S64).with_timestamp().to_byte(),
            0x98
        );
    }

    #[test]
    fn test_payload_type_parse() {
        let parsed = PayloadType::from_byte(0x94).unwrap();
        assert_eq!(parsed.element, ElementType::S32);
        assert!(parsed.timestamped);

        assert!(PayloadType::from_byte(0x00).is_none());
        assert!(PayloadType::from_byte(0x03).is_none());
        // Float flag is only valid on 4-byte elements.
        assert!(PayloadType::from_byte(0x48).is_none());
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::S16.size(), 2);
        assert_eq!(ElementType::Float.size(), 4);
        assert_eq!(ElementType::U64.size(), 8);
        assert!(ElementType::S8.is_signed());
        assert!(ElementType::Float.is_float());
        assert!(!ElementType::Float.is_signed());
    }

    #[test]
    fn test_timestamp_fixed_point() {
        let ts = Timestamp::from_seconds(12.5);
        assert_eq!(ts.raw(), (12u64 << 32) | 0x8000_0000);
        assert_eq!(ts.as_seconds(), 12.5);
        assert_eq!(Timestamp::from_le_bytes(ts.to_le_bytes()), ts);
    }

    #[test]
    fn test_timestamp_saturates() {
        assert_eq!(Timestamp::from_seconds(-1.0).raw(), 0);
        assert_eq!(Timestamp::from_seconds(f64::NAN).raw(), 0);
        assert_eq!(Timestamp::from_seconds(1e12).raw(), u64::MAX);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[0x10, 0x20, 0x30]), 0x60);
    }

    #[test]
    fn test_size_constants() {
        assert_eq!(MIN_FRAME_SIZE, 6);
        assert_eq!(MAX_FRAME_SIZE, 257);
        assert_eq!(MAX_PAYLOAD_SIZE, 251);
    }
}
