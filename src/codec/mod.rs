//! Codec module - typed payload serialization.
//!
//! Register values travel as little endian arrays of one element type.
//! This module maps Rust values onto that representation:
//!
//! - [`Element`] - the scalar kinds (`u8`..`u64`, `i8`..`i64`, `f32`)
//! - [`PayloadValue`] - anything a register can hold: scalars, `[T; N]`,
//!   `Vec<T>` and bit-set flag types
//! - [`Timestamped`] - a value plus the device time it was sampled at
//!
//! # Design
//!
//! The payload shape is checked against the message's declared payload
//! type and element count before decoding. A mismatch is an error, never
//! a reinterpretation of the bytes.
//!
//! # Example
//!
//! ```
//! use harp_client::protocol::{Message, MessageType};
//!
//! let message = Message::from_payload(33, MessageType::Write, &-150i32).unwrap();
//! assert_eq!(message.payload::<i32>().unwrap(), -150);
//! assert!(message.payload::<u32>().is_err());
//! ```

mod payload;
mod timestamped;

pub(crate) use payload::flags_payload;
pub use payload::{Element, PayloadValue};
pub use timestamped::Timestamped;
