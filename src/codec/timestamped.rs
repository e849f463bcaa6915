//! Values paired with the device clock.

use serde::{Deserialize, Serialize};

/// A decoded register value with the device timestamp it was sampled at.
///
/// `seconds` is the device clock in seconds, converted from the 32.32
/// fixed-point wire timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    /// Device time in seconds.
    pub seconds: f64,
    /// Register value.
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, seconds: f64) -> Self {
        Self { seconds, value }
    }

    /// Transform the value, keeping the timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timestamped<U> {
        Timestamped {
            seconds: self.seconds,
            value: f(self.value),
        }
    }
}
