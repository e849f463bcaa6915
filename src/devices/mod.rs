//! Device profiles.
//!
//! A profile pairs a device's identity (the value of its `WhoAmI`
//! register) with its register directory. Opening a session with a
//! profile checks the identity before any other register is touched.

pub mod fast_stepper;
pub mod vestibular_h2;

use std::sync::Arc;

use crate::error::Result;
use crate::registers::{RegisterDescriptor, RegisterDirectory};

pub use fast_stepper::{ControlFlags, MotorStateFlags, StopSwitchFlags};

/// Identity and register layout of one device type.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    name: &'static str,
    who_am_i: u16,
    directory: Arc<RegisterDirectory>,
}

impl DeviceProfile {
    /// Build a profile from the common core registers plus `registers`.
    pub fn new(
        name: &'static str,
        who_am_i: u16,
        registers: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Self> {
        let directory = RegisterDirectory::builder()
            .with_common()
            .extend(registers)
            .build()?;
        Ok(Self {
            name,
            who_am_i,
            directory: Arc::new(directory),
        })
    }

    /// FastStepper motor controller.
    pub fn fast_stepper() -> Result<Self> {
        Self::new(
            "FastStepper",
            fast_stepper::WHO_AM_I,
            fast_stepper::REGISTERS.iter().copied(),
        )
    }

    /// VestibularH2 interface board.
    pub fn vestibular_h2() -> Result<Self> {
        Self::new(
            "VestibularH2",
            vestibular_h2::WHO_AM_I,
            vestibular_h2::REGISTERS.iter().copied(),
        )
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Expected `WhoAmI` value.
    #[inline]
    pub fn who_am_i(&self) -> u16 {
        self.who_am_i
    }

    #[inline]
    pub fn directory(&self) -> &Arc<RegisterDirectory> {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ElementType;
    use crate::registers::{common, Access};

    #[test]
    fn test_builtin_profiles_build() {
        let stepper = DeviceProfile::fast_stepper().unwrap();
        assert_eq!(stepper.who_am_i(), 2120);
        assert_eq!(
            stepper.directory().len(),
            common::CORE_REGISTERS.len() + fast_stepper::REGISTERS.len()
        );

        let board = DeviceProfile::vestibular_h2().unwrap();
        assert_eq!(board.who_am_i(), 0);
        assert_eq!(board.directory().lookup(32).unwrap().name(), "DigitalInputs");
    }

    #[test]
    fn test_profile_rejects_core_override() {
        let result = DeviceProfile::new(
            "Broken",
            1,
            [RegisterDescriptor::new(
                common::WHO_AM_I,
                "WhoAmI",
                ElementType::U8,
                1,
                Access::READ,
            )],
        );
        assert!(result.is_err());
    }
}
