//! VestibularH2 interface board.

use crate::protocol::ElementType;
use crate::registers::{Access, RegisterDescriptor};

pub const WHO_AM_I: u16 = 0;

/// State of the digital input lines.
pub const DIGITAL_INPUTS: u8 = 32;

pub const REGISTERS: [RegisterDescriptor; 1] = [RegisterDescriptor::new(
    DIGITAL_INPUTS,
    "DigitalInputs",
    ElementType::U8,
    1,
    Access::READ.union(Access::EVENT),
)];
