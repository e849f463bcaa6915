//! Identify a device - connect, check WhoAmI and print the core registers.
//!
//! ```text
//! cargo run --example identify -- --port /dev/ttyUSB0 --device fast-stepper
//! ```

use clap::{Parser, ValueEnum};
use harp_client::devices::DeviceProfile;
use harp_client::registers::common;
use harp_client::{Session, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Device {
    FastStepper,
    VestibularH2,
}

#[derive(Parser, Debug)]
#[command(name = "identify", about = "Print the identity of a Harp device")]
struct Cli {
    /// Serial port the device is attached to.
    #[arg(long, env = "HARP_PORT")]
    port: String,

    #[arg(long, value_enum, default_value = "fast-stepper")]
    device: Device,

    /// Optional JSON session configuration.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let profile = match cli.device {
        Device::FastStepper => DeviceProfile::fast_stepper()?,
        Device::VestibularH2 => DeviceProfile::vestibular_h2()?,
    };
    let config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };

    let session = Session::builder(profile).config(config).open(&cli.port).await?;

    let hardware = (
        session.read_register::<u8>(common::HARDWARE_VERSION_HIGH).await?,
        session.read_register::<u8>(common::HARDWARE_VERSION_LOW).await?,
    );
    let firmware = (
        session.read_register::<u8>(common::FIRMWARE_VERSION_HIGH).await?,
        session.read_register::<u8>(common::FIRMWARE_VERSION_LOW).await?,
    );
    let name: Vec<u8> = session.read_register(common::DEVICE_NAME).await?;
    let serial: u16 = session.read_register(common::SERIAL_NUMBER).await?;
    let clock = session
        .read_timestamped_register::<u32>(common::TIMESTAMP_SECONDS)
        .await?;

    let name = String::from_utf8_lossy(&name);
    println!("device:   {}", name.trim_end_matches('\0'));
    println!("whoami:   {}", session.profile().who_am_i());
    println!("hardware: {}.{}", hardware.0, hardware.1);
    println!("firmware: {}.{}", firmware.0, firmware.1);
    println!("serial:   {}", serial);
    println!("clock:    {} s (at {:.6})", clock.value, clock.seconds);

    session.close().await;
    Ok(())
}
