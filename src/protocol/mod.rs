//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the binary device protocol:
//! - Field encodings (message type, payload type, timestamp, checksum)
//! - Frame codec for whole frames
//! - Frame buffer for reassembling frames from a byte stream

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{decode_frame, encode_frame, Message};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    checksum, flags, ElementType, MessageType, PayloadType, Timestamp, CHECKSUM_SIZE,
    FRAME_PREFIX_SIZE, HEADER_FIELDS_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE,
    MIN_LENGTH, PREAMBLE, TIMESTAMP_SIZE,
};
