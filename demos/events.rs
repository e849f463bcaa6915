//! Event monitor - print every event a device publishes.
//!
//! Events are printed as JSON lines, one per event:
//!
//! ```text
//! cargo run --example events -- --port /dev/ttyUSB0 --register Encoder
//! {"register":"Encoder","seconds":12.504,"values":[-37]}
//! ```

use clap::Parser;
use harp_client::devices::DeviceProfile;
use harp_client::protocol::{ElementType, Message};
use harp_client::registers::common::{self, OperationControlFlags};
use harp_client::{HarpError, Session};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "events", about = "Print events from a FastStepper")]
struct Cli {
    #[arg(long, env = "HARP_PORT")]
    port: String,

    /// Only print events from the register with this name.
    #[arg(long)]
    register: Option<String>,

    /// Stop after this many events.
    #[arg(long)]
    count: Option<usize>,
}

#[derive(Serialize)]
struct EventLine<'a> {
    register: &'a str,
    seconds: Option<f64>,
    values: Vec<f64>,
}

fn values(message: &Message) -> Result<Vec<f64>, HarpError> {
    Ok(match message.payload_type().element {
        ElementType::U8 => message.payload::<Vec<u8>>()?.into_iter().map(f64::from).collect(),
        ElementType::S8 => message.payload::<Vec<i8>>()?.into_iter().map(f64::from).collect(),
        ElementType::U16 => message.payload::<Vec<u16>>()?.into_iter().map(f64::from).collect(),
        ElementType::S16 => message.payload::<Vec<i16>>()?.into_iter().map(f64::from).collect(),
        ElementType::U32 => message.payload::<Vec<u32>>()?.into_iter().map(f64::from).collect(),
        ElementType::S32 => message.payload::<Vec<i32>>()?.into_iter().map(f64::from).collect(),
        ElementType::U64 => message.payload::<Vec<u64>>()?.into_iter().map(|v| v as f64).collect(),
        ElementType::S64 => message.payload::<Vec<i64>>()?.into_iter().map(|v| v as f64).collect(),
        ElementType::Float => message.payload::<Vec<f32>>()?.into_iter().map(f64::from).collect(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::open(&cli.port, DeviceProfile::fast_stepper()?).await?;

    let mut events = match &cli.register {
        Some(name) => {
            let descriptor = session
                .directory()
                .iter()
                .find(|d| d.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| format!("no register named {name}"))?;
            session.register_events(descriptor.address())?
        }
        None => session.events(),
    };

    // Events only flow in active mode.
    session
        .write_register(
            common::OPERATION_CONTROL,
            OperationControlFlags::ACTIVE | OperationControlFlags::HEARTBEAT,
        )
        .await?;

    let mut seen = 0;
    loop {
        let message = tokio::select! {
            message = events.recv() => message?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let register = session
            .directory()
            .get(message.address())
            .map_or("?", |d| d.name());
        let line = EventLine {
            register,
            seconds: message.timestamp().map(|t| t.as_seconds()),
            values: values(&message)?,
        };
        println!("{}", serde_json::to_string(&line)?);

        seen += 1;
        if cli.count.is_some_and(|count| seen >= count) {
            break;
        }
    }

    session.close().await;
    Ok(())
}
