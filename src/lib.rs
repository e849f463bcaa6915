//! # harp-client
//!
//! Async Rust client for devices speaking the Harp binary register protocol
//! over a serial link.
//!
//! ## Architecture
//!
//! - **Protocol**: frame codec and stream reassembly
//! - **Codec**: typed payloads (`u8`..`u64`, `i8`..`i64`, `f32`, arrays, flag sets)
//! - **Registers**: per-device tables mapping addresses to payload shapes
//! - **Session**: one reader task, one writer task, and a correlator that
//!   matches replies to commands
//!
//! ## Example
//!
//! ```ignore
//! use harp_client::devices::{fast_stepper, DeviceProfile};
//! use harp_client::Session;
//!
//! #[tokio::main]
//! async fn main() -> harp_client::Result<()> {
//!     let session = Session::open("/dev/ttyUSB0", DeviceProfile::fast_stepper()?).await?;
//!
//!     session.write_register(fast_stepper::PULSES, 400i32).await?;
//!
//!     let mut moves = session.register_events(fast_stepper::MOTOR_STATE)?;
//!     let state = moves.recv_value::<fast_stepper::MotorStateFlags>().await?;
//!     println!("{:.3}s: {:?}", state.seconds, state.value);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod correlator;
pub mod devices;
pub mod error;
pub mod protocol;
pub mod registers;
pub mod session;
pub mod transport;
pub mod writer;

pub use codec::{PayloadValue, Timestamped};
pub use devices::DeviceProfile;
pub use error::{HarpError, Result};
pub use protocol::Message;
pub use session::{EventSubscription, Session, SessionBuilder, SessionConfig};
