//! Register directory: address to payload shape.
//!
//! Each device type has one directory, built once from the common core
//! table plus the device's own entries. The directory is a 256-slot table
//! indexed by address, so lookups never allocate or hash.
//!
//! # Example
//!
//! ```
//! use harp_client::protocol::ElementType;
//! use harp_client::registers::{Access, RegisterDescriptor, RegisterDirectory};
//!
//! let directory = RegisterDirectory::builder()
//!     .with_common()
//!     .register(RegisterDescriptor::new(32, "Inputs", ElementType::U8, 1, Access::READ))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(directory.lookup(32).unwrap().name(), "Inputs");
//! assert!(directory.lookup(99).is_err());
//! ```

pub mod common;

use bitflags::bitflags;
use serde::Serialize;

use crate::codec::PayloadValue;
use crate::error::{HarpError, Result};
use crate::protocol::{
    ElementType, Message, MessageType, PayloadType, MAX_PAYLOAD_SIZE, TIMESTAMP_SIZE,
};

const SLOTS: usize = u8::MAX as usize + 1;

bitflags! {
    /// What a register allows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct Access: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// Device publishes the register as an event.
        const EVENT = 0x04;
    }
}

/// Static description of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterDescriptor {
    address: u8,
    name: &'static str,
    element: ElementType,
    length: usize,
    access: Access,
}

impl RegisterDescriptor {
    pub const fn new(
        address: u8,
        name: &'static str,
        element: ElementType,
        length: usize,
        access: Access,
    ) -> Self {
        Self {
            address,
            name,
            element,
            length,
            access,
        }
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Element count.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Payload type of the register value (no timestamp).
    pub fn payload_type(&self) -> PayloadType {
        PayloadType::new(self.element)
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.element.size() * self.length
    }

    pub fn is_writable(&self) -> bool {
        self.access.contains(Access::WRITE)
    }

    /// Read request for this register.
    pub fn read_request(&self) -> Message {
        Message::read_request(self.address, self.payload_type())
    }

    /// Build a message carrying `value`, checked against this register's shape.
    pub fn from_payload<T: PayloadValue>(
        &self,
        message_type: MessageType,
        value: &T,
    ) -> Result<Message> {
        self.check_type::<T>()?;
        let message = Message::from_payload(self.address, message_type, value)?;
        self.validate(&message)?;
        Ok(message)
    }

    /// Check that `T` can hold this register's value.
    pub fn check_type<T: PayloadValue>(&self) -> Result<()> {
        let count_ok = match T::COUNT {
            Some(n) => n == self.length,
            None => true,
        };
        if T::ELEMENT != self.element || !count_ok {
            return Err(HarpError::PayloadTypeMismatch(format!(
                "register {} ({}) holds {} x {}, value is {} x {}",
                self.address,
                self.name,
                self.length,
                self.element,
                T::COUNT.map_or_else(|| "N".to_string(), |n| n.to_string()),
                T::ELEMENT
            )));
        }
        Ok(())
    }

    /// Check that a message with a payload matches this register's shape.
    pub fn validate(&self, message: &Message) -> Result<()> {
        let element = message.payload_type().element;
        let count = message.element_count();
        if element != self.element || count != self.length {
            return Err(HarpError::PayloadTypeMismatch(format!(
                "register {} ({}) holds {} x {}, message carries {count} x {element}",
                self.address, self.name, self.length, self.element
            )));
        }
        Ok(())
    }
}

/// Register table for one device type.
#[derive(Debug, Clone)]
pub struct RegisterDirectory {
    slots: Vec<Option<RegisterDescriptor>>,
    len: usize,
}

impl RegisterDirectory {
    pub fn builder() -> RegisterDirectoryBuilder {
        RegisterDirectoryBuilder::new()
    }

    /// Look up a register.
    ///
    /// Fails with `UnknownRegister` if the address has no entry.
    pub fn lookup(&self, address: u8) -> Result<&RegisterDescriptor> {
        self.get(address).ok_or(HarpError::UnknownRegister(address))
    }

    #[inline]
    pub fn get(&self, address: u8) -> Option<&RegisterDescriptor> {
        self.slots.get(address as usize).and_then(Option::as_ref)
    }

    /// Registers in address order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Builder for [`RegisterDirectory`].
///
/// Entries are only validated in [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RegisterDirectoryBuilder {
    entries: Vec<RegisterDescriptor>,
}

impl RegisterDirectoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the core registers every device shares.
    pub fn with_common(self) -> Self {
        self.extend(common::CORE_REGISTERS.iter().copied())
    }

    pub fn register(mut self, descriptor: RegisterDescriptor) -> Self {
        self.entries.push(descriptor);
        self
    }

    pub fn extend(mut self, descriptors: impl IntoIterator<Item = RegisterDescriptor>) -> Self {
        self.entries.extend(descriptors);
        self
    }

    /// Build the directory.
    ///
    /// Fails with `Configuration` on a duplicate address, a zero-length
    /// register, or a register too large for a timestamped frame.
    pub fn build(self) -> Result<RegisterDirectory> {
        let mut slots: Vec<Option<RegisterDescriptor>> = vec![None; SLOTS];
        let mut len = 0;

        for descriptor in self.entries {
            let address = descriptor.address as usize;
            if let Some(existing) = &slots[address] {
                return Err(HarpError::Configuration(format!(
                    "register {address} defined twice ({} and {})",
                    existing.name, descriptor.name
                )));
            }
            if descriptor.length == 0 {
                return Err(HarpError::Configuration(format!(
                    "register {address} ({}) has zero length",
                    descriptor.name
                )));
            }
            if descriptor.payload_size() > MAX_PAYLOAD_SIZE - TIMESTAMP_SIZE {
                return Err(HarpError::Configuration(format!(
                    "register {address} ({}) needs {} payload bytes, a frame carries at most {}",
                    descriptor.name,
                    descriptor.payload_size(),
                    MAX_PAYLOAD_SIZE - TIMESTAMP_SIZE
                )));
            }
            slots[address] = Some(descriptor);
            len += 1;
        }

        Ok(RegisterDirectory { slots, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepper_like() -> RegisterDirectory {
        RegisterDirectory::builder()
            .with_common()
            .register(RegisterDescriptor::new(
                33,
                "Pulses",
                ElementType::S32,
                1,
                Access::WRITE,
            ))
            .register(RegisterDescriptor::new(
                38,
                "Encoder",
                ElementType::S16,
                1,
                Access::READ.union(Access::EVENT),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup() {
        let directory = stepper_like();
        let pulses = directory.lookup(33).unwrap();
        assert_eq!(pulses.element(), ElementType::S32);
        assert_eq!(pulses.length(), 1);
        assert!(pulses.is_writable());

        assert_eq!(directory.lookup(0).unwrap().name(), "WhoAmI");
        assert!(matches!(
            directory.lookup(200),
            Err(HarpError::UnknownRegister(200))
        ));
    }

    #[test]
    fn test_iter_in_address_order() {
        let directory = stepper_like();
        let addresses: Vec<u8> = directory.iter().map(|d| d.address()).collect();
        let mut sorted = addresses.clone();
        sorted.sort_unstable();
        assert_eq!(addresses, sorted);
        assert_eq!(directory.len(), common::CORE_REGISTERS.len() + 2);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let result = RegisterDirectory::builder()
            .with_common()
            .register(RegisterDescriptor::new(
                0,
                "Shadow",
                ElementType::U8,
                1,
                Access::READ,
            ))
            .build();
        assert!(matches!(result, Err(HarpError::Configuration(_))));
    }

    #[test]
    fn test_zero_length_rejected() {
        let result = RegisterDirectory::builder()
            .register(RegisterDescriptor::new(
                40,
                "Empty",
                ElementType::U8,
                0,
                Access::READ,
            ))
            .build();
        assert!(matches!(result, Err(HarpError::Configuration(_))));
    }

    #[test]
    fn test_oversized_register_rejected() {
        let result = RegisterDirectory::builder()
            .register(RegisterDescriptor::new(
                40,
                "Huge",
                ElementType::U32,
                62,
                Access::READ,
            ))
            .build();
        assert!(matches!(result, Err(HarpError::Configuration(_))));

        let fits = RegisterDirectory::builder()
            .register(RegisterDescriptor::new(
                40,
                "Large",
                ElementType::U32,
                60,
                Access::READ,
            ))
            .build();
        assert!(fits.is_ok());
    }

    #[test]
    fn test_from_payload_checks_shape() {
        let directory = stepper_like();
        let pulses = directory.lookup(33).unwrap();

        let message = pulses.from_payload(MessageType::Write, &-150i32).unwrap();
        assert_eq!(message.address(), 33);
        assert_eq!(message.payload::<i32>().unwrap(), -150);

        assert!(matches!(
            pulses.from_payload(MessageType::Write, &150u32),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
    }

    #[test]
    fn test_array_register_length_checked() {
        let directory = stepper_like();
        let name = directory.lookup(common::DEVICE_NAME).unwrap();

        let mut padded = [0u8; 25];
        padded[..4].copy_from_slice(b"FSTP");
        assert!(name.from_payload(MessageType::Write, &padded).is_ok());
        assert!(name.from_payload(MessageType::Write, &padded.to_vec()).is_ok());

        assert!(name.from_payload(MessageType::Write, &b"FSTP".to_vec()).is_err());
        assert!(name.from_payload(MessageType::Write, &[0u8; 24]).is_err());
    }

    #[test]
    fn test_validate_inbound() {
        let directory = stepper_like();
        let encoder = directory.lookup(38).unwrap();

        let good = Message::from_payload(38, MessageType::Event, &-3i16).unwrap();
        assert!(encoder.validate(&good).is_ok());

        let bad = Message::from_payload(38, MessageType::Event, &[1i16, 2]).unwrap();
        assert!(encoder.validate(&bad).is_err());
    }
}
