//! Stepper move - configure the FastStepper, run a move, wait until it stops.
//!
//! ```text
//! cargo run --example stepper -- --port /dev/ttyUSB0 --pulses -800
//! ```

use std::time::Duration;

use clap::Parser;
use harp_client::devices::fast_stepper::{self, ControlFlags, MotorStateFlags};
use harp_client::devices::DeviceProfile;
use harp_client::Session;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stepper", about = "Run one move on a FastStepper")]
struct Cli {
    #[arg(long, env = "HARP_PORT")]
    port: String,

    /// Pulses to send. The sign sets the direction.
    #[arg(long, allow_hyphen_values = true, default_value_t = 400)]
    pulses: i32,

    /// Pulse interval at nominal speed.
    #[arg(long, default_value_t = 250)]
    nominal_interval: u16,

    /// First and last pulse interval.
    #[arg(long, default_value_t = 2000)]
    initial_interval: u16,

    /// Interval change per pulse while ramping.
    #[arg(long, default_value_t = 10)]
    step_interval: u16,

    /// Give up waiting for the move after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let session = Session::open(&cli.port, DeviceProfile::fast_stepper()?).await?;

    session
        .write_register(
            fast_stepper::CONTROL,
            ControlFlags::ENABLE_MOTOR | ControlFlags::ENABLE_ENCODER | ControlFlags::RESET_ENCODER,
        )
        .await?;
    session
        .write_register(fast_stepper::NOMINAL_PULSE_INTERVAL, cli.nominal_interval)
        .await?;
    session
        .write_register(fast_stepper::INITIAL_PULSE_INTERVAL, cli.initial_interval)
        .await?;
    session
        .write_register(fast_stepper::PULSE_STEP_INTERVAL, cli.step_interval)
        .await?;

    let mut motor = session.register_events(fast_stepper::MOTOR_STATE)?;
    session.write_register(fast_stepper::PULSES, cli.pulses).await?;
    tracing::info!("Moving {} pulses", cli.pulses);

    let wait_for_stop = async {
        loop {
            let state = motor.recv_value::<MotorStateFlags>().await?;
            if !state.value.contains(MotorStateFlags::IS_MOVING) {
                return Ok::<f64, harp_client::HarpError>(state.seconds);
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(cli.timeout), wait_for_stop).await {
        Ok(stopped_at) => {
            let stopped_at = stopped_at?;
            let encoder: i16 = session.read_register(fast_stepper::ENCODER).await?;
            println!("stopped at {:.3} s, encoder {}", stopped_at, encoder);
        }
        Err(_) => tracing::warn!("Motor still moving after {} s", cli.timeout),
    }

    session
        .write_register(fast_stepper::CONTROL, ControlFlags::DISABLE_MOTOR)
        .await?;
    session.close().await;
    Ok(())
}
