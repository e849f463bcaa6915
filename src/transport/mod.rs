//! Transport module - byte streams to the device.
//!
//! Sessions run over any `AsyncRead + AsyncWrite` stream. This module
//! provides the serial port stream used with real hardware.

mod serial;

pub use serial::{open_serial, FlowControl, Parity, SerialConfig, DEFAULT_BAUD_RATE};
