//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `Hunting`: Skipping bytes until a preamble is found
//! - `WaitingForFrame`: Preamble and length seen, need N more bytes
//!
//! A frame that fails to decode is reported and only its preamble byte is
//! discarded, so scanning resumes at the next preamble. While waiting for
//! the rest of a frame, a complete valid frame starting at a later preamble
//! abandons the pending one. A stray preamble byte or a corrupted length
//! therefore cannot hold back the good frames behind it.
//!
//! # Example
//!
//! ```ignore
//! use harp_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the serial port
//! for result in buffer.push(&chunk) {
//!     match result {
//!         Ok(message) => println!("register {}", message.address()),
//!         Err(e) => eprintln!("dropped frame: {e}"),
//!     }
//! }
//! ```

use bytes::{Buf, BytesMut};

use super::frame::{decode_frame, Message};
use super::wire_format::{FRAME_PREFIX_SIZE, MAX_FRAME_SIZE, MIN_LENGTH, PREAMBLE};
use crate::error::{HarpError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Looking for a preamble byte.
    Hunting,
    /// Preamble found and length known, waiting for `total` bytes.
    WaitingForFrame { total: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Bytes skipped while hunting for a preamble.
    skipped: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer.
    pub fn new() -> Self {
        Self::with_capacity(4 * MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::Hunting,
            skipped: 0,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns one entry per frame candidate: decoded messages, or the
    /// error that caused a candidate to be discarded. Partial data is kept
    /// for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Message>> {
        self.buffer.extend_from_slice(data);

        let mut out = Vec::new();
        while let Some(result) = self.try_extract_one() {
            out.push(result);
        }
        out
    }

    /// Try to extract a single frame candidate.
    ///
    /// Returns `None` when more data is needed.
    fn try_extract_one(&mut self) -> Option<Result<Message>> {
        loop {
            match self.state {
                State::Hunting => {
                    match self.buffer.iter().position(|b| *b == PREAMBLE) {
                        Some(pos) => {
                            self.skip(pos);
                        }
                        None => {
                            let len = self.buffer.len();
                            self.skip(len);
                            return None;
                        }
                    }

                    if self.buffer.len() < FRAME_PREFIX_SIZE {
                        return None;
                    }

                    let length = self.buffer[1] as usize;
                    if length < MIN_LENGTH {
                        self.skip(1);
                        return Some(Err(HarpError::MalformedFrame(format!(
                            "length field {length} is below the minimum {MIN_LENGTH}"
                        ))));
                    }

                    self.state = State::WaitingForFrame {
                        total: FRAME_PREFIX_SIZE + length,
                    };
                }

                State::WaitingForFrame { total } => {
                    if self.buffer.len() < total {
                        let pos = self.later_valid_frame()?;
                        self.state = State::Hunting;
                        self.skip(pos);
                        return Some(Err(HarpError::MalformedFrame(format!(
                            "incomplete {total}-byte frame abandoned for a valid frame {pos} bytes later"
                        ))));
                    }

                    self.state = State::Hunting;
                    return match decode_frame(&self.buffer[..total]) {
                        Ok(message) => {
                            self.buffer.advance(total);
                            Some(Ok(message))
                        }
                        Err(e) => {
                            // Drop the preamble only and rescan the rest.
                            self.buffer.advance(1);
                            Some(Err(e))
                        }
                    };
                }
            }
        }
    }

    /// Offset of the first complete, valid frame after the buffered preamble.
    fn later_valid_frame(&self) -> Option<usize> {
        let buf = &self.buffer[..];
        (1..buf.len()).find(|&pos| {
            if buf[pos] != PREAMBLE || pos + FRAME_PREFIX_SIZE > buf.len() {
                return false;
            }
            let end = pos + FRAME_PREFIX_SIZE + buf[pos + 1] as usize;
            end <= buf.len() && decode_frame(&buf[pos..end]).is_ok()
        })
    }

    fn skip(&mut self, count: usize) {
        if count > 0 {
            self.buffer.advance(count);
            self.skipped += count as u64;
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes skipped outside of any frame.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::Hunting => "Hunting",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
