//! FastStepper motor controller.
//!
//! Motion is driven by writing pulse counts and intervals; the encoder,
//! analog input, stop switch and motor state are published as events.
//!
//! ```
//! use harp_client::devices::fast_stepper::{self, ControlFlags};
//! use harp_client::devices::DeviceProfile;
//! use harp_client::protocol::MessageType;
//!
//! let profile = DeviceProfile::fast_stepper().unwrap();
//! let control = profile.directory().lookup(fast_stepper::CONTROL).unwrap();
//!
//! let message = control
//!     .from_payload(MessageType::Write, &(ControlFlags::ENABLE_MOTOR | ControlFlags::ENABLE_ENCODER))
//!     .unwrap();
//! assert_eq!(message.payload_bytes(), &[0x11]);
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::codec::flags_payload;
use crate::protocol::ElementType;
use crate::registers::{Access, RegisterDescriptor};

pub const WHO_AM_I: u16 = 2120;

/// Enables and disables the device modules. See [`ControlFlags`].
pub const CONTROL: u8 = 32;
/// Number of pulses to send. The sign sets the direction.
pub const PULSES: u8 = 33;
/// Pulse interval at nominal speed.
pub const NOMINAL_PULSE_INTERVAL: u8 = 34;
/// First and last pulse interval of a move.
pub const INITIAL_PULSE_INTERVAL: u8 = 35;
/// Interval change per pulse while accelerating or decelerating.
pub const PULSE_STEP_INTERVAL: u8 = 36;
pub const PULSE_PERIOD: u8 = 37;
/// Quadrature encoder reading.
pub const ENCODER: u8 = 38;
pub const ANALOG_INPUT: u8 = 39;
/// See [`StopSwitchFlags`].
pub const STOP_SWITCH: u8 = 40;
/// See [`MotorStateFlags`].
pub const MOTOR_STATE: u8 = 41;
/// Runs the motor immediately at this pulse interval. The sign sets the direction.
pub const IMMEDIATE_PULSES: u8 = 42;

const W: Access = Access::WRITE;
const RE: Access = Access::READ.union(Access::EVENT);

pub const REGISTERS: [RegisterDescriptor; 11] = [
    RegisterDescriptor::new(CONTROL, "Control", ElementType::U8, 1, W),
    RegisterDescriptor::new(PULSES, "Pulses", ElementType::S32, 1, W),
    RegisterDescriptor::new(NOMINAL_PULSE_INTERVAL, "NominalPulseInterval", ElementType::U16, 1, W),
    RegisterDescriptor::new(INITIAL_PULSE_INTERVAL, "InitialPulseInterval", ElementType::U16, 1, W),
    RegisterDescriptor::new(PULSE_STEP_INTERVAL, "PulseStepInterval", ElementType::U16, 1, W),
    RegisterDescriptor::new(PULSE_PERIOD, "PulsePeriod", ElementType::U16, 1, W),
    RegisterDescriptor::new(ENCODER, "Encoder", ElementType::S16, 1, RE),
    RegisterDescriptor::new(ANALOG_INPUT, "AnalogInput", ElementType::S16, 1, RE),
    RegisterDescriptor::new(
        STOP_SWITCH,
        "StopSwitch",
        ElementType::U8,
        1,
        Access::WRITE.union(Access::EVENT),
    ),
    RegisterDescriptor::new(MOTOR_STATE, "MotorState", ElementType::U8, 1, RE),
    RegisterDescriptor::new(IMMEDIATE_PULSES, "ImmediatePulses", ElementType::S16, 1, W),
];

bitflags! {
    /// Bits of the `Control` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ControlFlags: u8 {
        const ENABLE_MOTOR = 0x01;
        const DISABLE_MOTOR = 0x02;
        const ENABLE_ANALOG_INPUT = 0x04;
        const DISABLE_ANALOG_INPUT = 0x08;
        const ENABLE_ENCODER = 0x10;
        const DISABLE_ENCODER = 0x20;
        const RESET_ENCODER = 0x40;
    }
}

bitflags! {
    /// Bits of the `StopSwitch` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StopSwitchFlags: u8 {
        const STOP_SWITCH = 0x01;
    }
}

bitflags! {
    /// Bits of the `MotorState` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MotorStateFlags: u8 {
        const IS_MOVING = 0x01;
    }
}

flags_payload!(ControlFlags, u8);
flags_payload!(StopSwitchFlags, u8);
flags_payload!(MotorStateFlags, u8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, MessageType};

    #[test]
    fn test_readable_registers() {
        let readable: Vec<_> = REGISTERS
            .iter()
            .filter(|d| d.access().contains(Access::READ))
            .map(|d| d.address())
            .collect();
        assert_eq!(readable, vec![ENCODER, ANALOG_INPUT, MOTOR_STATE]);
    }

    #[test]
    fn test_motor_state_event_decodes_as_flags() {
        let event = Message::from_timestamped_payload(
            MOTOR_STATE,
            2.0,
            MessageType::Event,
            &MotorStateFlags::IS_MOVING,
        )
        .unwrap();
        let state = event.timestamped_payload::<MotorStateFlags>().unwrap();
        assert!(state.value.contains(MotorStateFlags::IS_MOVING));
        assert_eq!(state.seconds, 2.0);
    }
}
