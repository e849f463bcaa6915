//! Core registers shared by every device (addresses 0 to 14).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::{Access, RegisterDescriptor};
use crate::codec::flags_payload;
use crate::protocol::ElementType;

pub const WHO_AM_I: u8 = 0;
pub const HARDWARE_VERSION_HIGH: u8 = 1;
pub const HARDWARE_VERSION_LOW: u8 = 2;
pub const ASSEMBLY_VERSION: u8 = 3;
pub const CORE_VERSION_HIGH: u8 = 4;
pub const CORE_VERSION_LOW: u8 = 5;
pub const FIRMWARE_VERSION_HIGH: u8 = 6;
pub const FIRMWARE_VERSION_LOW: u8 = 7;
pub const TIMESTAMP_SECONDS: u8 = 8;
pub const TIMESTAMP_MICROSECONDS: u8 = 9;
pub const OPERATION_CONTROL: u8 = 10;
pub const RESET_DEVICE: u8 = 11;
pub const DEVICE_NAME: u8 = 12;
pub const SERIAL_NUMBER: u8 = 13;
pub const CLOCK_CONFIGURATION: u8 = 14;

/// Length of the `DeviceName` register in bytes.
pub const DEVICE_NAME_LENGTH: usize = 25;

const R: Access = Access::READ;
const RW: Access = Access::READ.union(Access::WRITE);

/// The core register table.
pub const CORE_REGISTERS: [RegisterDescriptor; 15] = [
    RegisterDescriptor::new(WHO_AM_I, "WhoAmI", ElementType::U16, 1, R),
    RegisterDescriptor::new(HARDWARE_VERSION_HIGH, "HardwareVersionHigh", ElementType::U8, 1, R),
    RegisterDescriptor::new(HARDWARE_VERSION_LOW, "HardwareVersionLow", ElementType::U8, 1, R),
    RegisterDescriptor::new(ASSEMBLY_VERSION, "AssemblyVersion", ElementType::U8, 1, R),
    RegisterDescriptor::new(CORE_VERSION_HIGH, "CoreVersionHigh", ElementType::U8, 1, R),
    RegisterDescriptor::new(CORE_VERSION_LOW, "CoreVersionLow", ElementType::U8, 1, R),
    RegisterDescriptor::new(FIRMWARE_VERSION_HIGH, "FirmwareVersionHigh", ElementType::U8, 1, R),
    RegisterDescriptor::new(FIRMWARE_VERSION_LOW, "FirmwareVersionLow", ElementType::U8, 1, R),
    RegisterDescriptor::new(
        TIMESTAMP_SECONDS,
        "TimestampSeconds",
        ElementType::U32,
        1,
        RW.union(Access::EVENT),
    ),
    RegisterDescriptor::new(TIMESTAMP_MICROSECONDS, "TimestampMicroseconds", ElementType::U16, 1, R),
    RegisterDescriptor::new(OPERATION_CONTROL, "OperationControl", ElementType::U8, 1, RW),
    RegisterDescriptor::new(RESET_DEVICE, "ResetDevice", ElementType::U8, 1, RW),
    RegisterDescriptor::new(DEVICE_NAME, "DeviceName", ElementType::U8, DEVICE_NAME_LENGTH, RW),
    RegisterDescriptor::new(SERIAL_NUMBER, "SerialNumber", ElementType::U16, 1, RW),
    RegisterDescriptor::new(CLOCK_CONFIGURATION, "ClockConfiguration", ElementType::U8, 1, RW),
];

bitflags! {
    /// Bits of the `OperationControl` register.
    ///
    /// Clearing `ACTIVE` puts the device in standby.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OperationControlFlags: u8 {
        const ACTIVE = 0x01;
        /// Ask the device to send every register once.
        const DUMP = 0x08;
        const MUTE_REPLIES = 0x10;
        const VISUAL_INDICATORS = 0x20;
        const OPERATION_LED = 0x40;
        /// Publish `TimestampSeconds` every second.
        const HEARTBEAT = 0x80;
    }
}

bitflags! {
    /// Bits of the `ResetDevice` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ResetFlags: u8 {
        const RESTORE_DEFAULT = 0x01;
        const RESTORE_EEPROM = 0x02;
        const SAVE = 0x04;
        const RESTORE_NAME = 0x08;
        const BOOT_FROM_DEFAULT = 0x40;
        const BOOT_FROM_EEPROM = 0x80;
    }
}

flags_payload!(OperationControlFlags, u8);
flags_payload!(ResetFlags, u8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, MessageType};

    #[test]
    fn test_addresses_match_table() {
        for (i, descriptor) in CORE_REGISTERS.iter().enumerate() {
            assert_eq!(descriptor.address() as usize, i);
        }
    }

    #[test]
    fn test_only_timestamp_seconds_is_an_event() {
        let events: Vec<_> = CORE_REGISTERS
            .iter()
            .filter(|d| d.access().contains(Access::EVENT))
            .map(|d| d.name())
            .collect();
        assert_eq!(events, vec!["TimestampSeconds"]);
    }

    #[test]
    fn test_operation_control_payload() {
        let flags = OperationControlFlags::ACTIVE | OperationControlFlags::HEARTBEAT;
        let message = Message::from_payload(OPERATION_CONTROL, MessageType::Write, &flags).unwrap();
        assert_eq!(message.payload_bytes(), &[0x81]);
        assert_eq!(message.payload::<OperationControlFlags>().unwrap(), flags);
    }

    #[test]
    fn test_unknown_bits_are_retained() {
        let message = Message::from_payload(RESET_DEVICE, MessageType::Read, &0x30u8).unwrap();
        assert_eq!(message.payload::<ResetFlags>().unwrap().bits(), 0x30);
    }
}
