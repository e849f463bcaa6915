//! Serial port transport.

use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{HarpError, Result};

/// Baud rate the devices run at.
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line settings. Defaults to 8N1 at [`DEFAULT_BAUD_RATE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(HarpError::Configuration(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(HarpError::Configuration(
                "data bits must be 5, 6, 7, or 8".to_string(),
            ));
        }
        if ![1, 2].contains(&self.stop_bits) {
            return Err(HarpError::Configuration(
                "stop bits must be 1 or 2".to_string(),
            ));
        }
        Ok(())
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }

    fn flow_control(&self) -> tokio_serial::FlowControl {
        match self.flow_control {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Open a serial port for a device session.
pub fn open_serial(port: &str, config: &SerialConfig) -> Result<SerialStream> {
    config.validate()?;
    tracing::debug!("Opening serial port {} at {} baud", port, config.baud_rate);

    #[allow(unused_mut)]
    let mut stream = tokio_serial::new(port, config.baud_rate)
        .data_bits(config.data_bits())
        .parity(config.parity())
        .stop_bits(config.stop_bits())
        .flow_control(config.flow_control())
        .open_native_async()
        .map_err(|e| {
            tracing::error!("Failed to open serial port {}: {}", port, e);
            HarpError::Transport(std::io::Error::from(e))
        })?;

    #[cfg(unix)]
    stream
        .set_exclusive(false)
        .map_err(|e| HarpError::Transport(std::io::Error::from(e)))?;

    Ok(stream)
}
