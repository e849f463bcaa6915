//! Device session: builder, lifecycle and register operations.
//!
//! The [`SessionBuilder`] configures timeouts and queue sizes. Opening a
//! session then:
//! 1. Opens the serial port (or takes a caller-provided stream)
//! 2. Spawns the writer task and the reader task
//! 3. Reads `WhoAmI` and checks it against the device profile
//!
//! The reader task reassembles frames, hands replies to the correlator,
//! publishes events, and sweeps expired commands.
//!
//! # Example
//!
//! ```ignore
//! use harp_client::devices::{fast_stepper, ControlFlags, DeviceProfile};
//! use harp_client::Session;
//!
//! #[tokio::main]
//! async fn main() -> harp_client::Result<()> {
//!     let session = Session::builder(DeviceProfile::fast_stepper()?)
//!         .reply_timeout(std::time::Duration::from_millis(500))
//!         .open("/dev/ttyUSB0")
//!         .await?;
//!
//!     session
//!         .write_register(fast_stepper::CONTROL, ControlFlags::ENABLE_MOTOR)
//!         .await?;
//!     session.write_register(fast_stepper::PULSES, -150i32).await?;
//!
//!     let encoder: i16 = session.read_register(fast_stepper::ENCODER).await?;
//!     println!("encoder at {encoder}");
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::codec::{PayloadValue, Timestamped};
use crate::correlator::{Correlator, Dispatch};
use crate::devices::DeviceProfile;
use crate::error::{HarpError, Result};
use crate::protocol::{FrameBuffer, Message, MessageType};
use crate::registers::{common, RegisterDescriptor, RegisterDirectory};
use crate::transport::{open_serial, SerialConfig};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default period of the expired-command sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Default writer queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

const READ_BUFFER_SIZE: usize = 4096;

/// Session settings.
///
/// Durations are given in milliseconds when loaded from JSON. Serial line
/// settings sit at the top level next to the session settings:
///
/// ```json
/// { "baud_rate": 1000000, "reply_timeout": 500, "event_capacity": 4096 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub serial: SerialConfig,
    #[serde(with = "duration_ms")]
    pub reply_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
    pub channel_capacity: usize,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            HarpError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        if self.reply_timeout.is_zero() {
            return Err(HarpError::Configuration(
                "reply timeout must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(HarpError::Configuration(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 || self.event_capacity == 0 {
            return Err(HarpError::Configuration(
                "channel and event capacities must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Builder for opening a [`Session`].
pub struct SessionBuilder {
    profile: DeviceProfile,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            config: SessionConfig::default(),
        }
    }

    /// Replace all settings.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the serial line settings.
    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.config.serial = serial;
        self
    }

    /// Default: 1_000_000
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.serial.baud_rate = baud_rate;
        self
    }

    /// Time a command waits for its reply.
    ///
    /// Default: 1 second
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = timeout;
        self
    }

    /// Default: 100 ms
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Writer queue capacity.
    ///
    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Events buffered per subscriber before the oldest are dropped.
    ///
    /// Default: 1024
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Open the serial port and connect.
    pub async fn open(self, port: &str) -> Result<Session> {
        self.config.validate()?;
        let stream = open_serial(port, &self.config.serial)?;
        tracing::info!(
            "Opened {} at {} baud for {}",
            port,
            self.config.serial.baud_rate,
            self.profile.name()
        );
        self.connect(stream).await
    }

    /// Connect over an already open stream.
    ///
    /// Fails with `UnexpectedDeviceIdentity` if the device's `WhoAmI`
    /// differs from the profile. The stream is closed in that case.
    pub async fn connect<S>(self, stream: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.config.validate()?;
        let session = Session::start(self.profile, self.config, stream);

        match session.check_identity().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }
}

/// An open connection to one device.
///
/// All methods take `&self`; commands may be issued concurrently from
/// several tasks. Dropping the session closes it.
pub struct Session {
    profile: DeviceProfile,
    config: SessionConfig,
    correlator: Arc<Correlator>,
    writer: WriterHandle,
    events: broadcast::Sender<Message>,
    cancel: CancellationToken,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Session {
    pub fn builder(profile: DeviceProfile) -> SessionBuilder {
        SessionBuilder::new(profile)
    }

    /// Open `port` with default settings and check the device identity.
    pub async fn open(port: &str, profile: DeviceProfile) -> Result<Session> {
        SessionBuilder::new(profile).open(port).await
    }

    /// Connect over `stream` with default settings and check the device identity.
    pub async fn connect<S>(stream: S, profile: DeviceProfile) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        SessionBuilder::new(profile).connect(stream).await
    }

    fn start<S>(profile: DeviceProfile, config: SessionConfig, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let cancel = CancellationToken::new();

        let (writer, writer_task) = spawn_writer_task(
            write_half,
            WriterConfig {
                channel_capacity: config.channel_capacity,
            },
            cancel.clone(),
        );

        let correlator = Arc::new(Correlator::new());
        let (events, _) = broadcast::channel(config.event_capacity);

        let reader = Reader {
            correlator: correlator.clone(),
            directory: profile.directory().clone(),
            events: events.clone(),
            cancel: cancel.clone(),
            sweep_interval: config.sweep_interval,
        };
        let reader_task = tokio::spawn(reader.run(read_half));

        Self {
            profile,
            config,
            correlator,
            writer,
            events,
            cancel,
            reader_task: Mutex::new(Some(reader_task)),
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    async fn check_identity(&self) -> Result<()> {
        let expected = self.profile.who_am_i();
        let actual: u16 = self.read_register(common::WHO_AM_I).await?;
        if actual != expected {
            tracing::error!(
                "Device reports WhoAmI {}, {} expects {}",
                actual,
                self.profile.name(),
                expected
            );
            return Err(HarpError::UnexpectedDeviceIdentity { expected, actual });
        }
        tracing::info!("Connected to {} (WhoAmI {})", self.profile.name(), actual);
        Ok(())
    }

    #[inline]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    #[inline]
    pub fn directory(&self) -> &RegisterDirectory {
        self.profile.directory()
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of commands awaiting a reply.
    pub fn pending_commands(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Number of frames queued for the serial port or being written.
    pub fn queued_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Check if the session no longer accepts commands.
    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed()
    }

    fn descriptor(&self, address: u8) -> Result<RegisterDescriptor> {
        self.directory().lookup(address).copied()
    }

    /// Send a raw command and wait for the matching reply.
    pub async fn command(
        &self,
        request: Message,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        self.correlator
            .send(&self.writer, request, self.config.reply_timeout, cancel)
            .await
    }

    /// Read a register value.
    pub async fn read_register<T: PayloadValue>(&self, address: u8) -> Result<T> {
        self.read_register_inner(address, None).await
    }

    /// Read a register value, giving up when `cancel` fires.
    pub async fn read_register_cancellable<T: PayloadValue>(
        &self,
        address: u8,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.read_register_inner(address, Some(cancel)).await
    }

    /// Read a register value with the device time it was sampled at.
    pub async fn read_timestamped_register<T: PayloadValue>(
        &self,
        address: u8,
    ) -> Result<Timestamped<T>> {
        self.read_timestamped_inner(address, None).await
    }

    pub async fn read_timestamped_register_cancellable<T: PayloadValue>(
        &self,
        address: u8,
        cancel: &CancellationToken,
    ) -> Result<Timestamped<T>> {
        self.read_timestamped_inner(address, Some(cancel)).await
    }

    /// Write a register value and wait for the device to acknowledge it.
    ///
    /// Fails with `ReadOnlyRegister` before sending anything if the
    /// register does not accept writes.
    pub async fn write_register<T: PayloadValue>(&self, address: u8, value: T) -> Result<()> {
        self.write_register_inner(address, value, None).await
    }

    pub async fn write_register_cancellable<T: PayloadValue>(
        &self,
        address: u8,
        value: T,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_register_inner(address, value, Some(cancel)).await
    }

    async fn read_reply<T: PayloadValue>(
        &self,
        address: u8,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        let descriptor = self.descriptor(address)?;
        descriptor.check_type::<T>()?;
        let reply = self.command(descriptor.read_request(), cancel).await?;
        descriptor.validate(&reply)?;
        Ok(reply)
    }

    async fn read_register_inner<T: PayloadValue>(
        &self,
        address: u8,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        self.read_reply::<T>(address, cancel).await?.payload()
    }

    async fn read_timestamped_inner<T: PayloadValue>(
        &self,
        address: u8,
        cancel: Option<&CancellationToken>,
    ) -> Result<Timestamped<T>> {
        self.read_reply::<T>(address, cancel)
            .await?
            .timestamped_payload()
    }

    async fn write_register_inner<T: PayloadValue>(
        &self,
        address: u8,
        value: T,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let descriptor = self.descriptor(address)?;
        if !descriptor.is_writable() {
            return Err(HarpError::ReadOnlyRegister(address));
        }
        let request = descriptor.from_payload(MessageType::Write, &value)?;
        self.command(request, cancel).await?;
        Ok(())
    }

    /// Subscribe to every validated event from the device.
    pub fn events(&self) -> EventSubscription {
        EventSubscription {
            rx: self.events.subscribe(),
            address: None,
            closed: self.cancel.clone(),
        }
    }

    /// Subscribe to events from one register.
    ///
    /// Fails with `UnknownRegister` if the address is not in the directory.
    pub fn register_events(&self, address: u8) -> Result<EventSubscription> {
        self.directory().lookup(address)?;
        Ok(EventSubscription {
            rx: self.events.subscribe(),
            address: Some(address),
            closed: self.cancel.clone(),
        })
    }

    /// Close the session.
    ///
    /// Pending and later commands fail with `SessionClosed`. Waits for the
    /// reader and writer tasks to stop. Closing twice is a no-op.
    pub async fn close(&self) {
        self.shutdown();

        let reader_task = self.reader_task.lock().take();
        if let Some(task) = reader_task {
            let _ = task.await;
        }
        let writer_task = self.writer_task.lock().take();
        if let Some(task) = writer_task {
            match task.await {
                Ok(Err(e)) => tracing::debug!("Writer stopped with error: {}", e),
                Err(e) => tracing::error!("Writer task failed: {}", e),
                Ok(Ok(())) => {}
            }
            tracing::info!("Closed session to {}", self.profile.name());
        }
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        let failed = self.correlator.close(|| HarpError::SessionClosed);
        if failed > 0 {
            tracing::debug!("Failed {} pending commands on close", failed);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stream of device events.
pub struct EventSubscription {
    rx: broadcast::Receiver<Message>,
    address: Option<u8>,
    closed: CancellationToken,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Fails with `SessionClosed` once the session is closed and the
    /// buffered events are drained. Events dropped because the subscriber
    /// fell behind are skipped with a warning.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            let received = tokio::select! {
                biased;
                received = self.rx.recv() => received,
                _ = self.closed.cancelled() => match self.rx.try_recv() {
                    Ok(message) => Ok(message),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        Err(broadcast::error::RecvError::Lagged(skipped))
                    }
                    Err(_) => Err(broadcast::error::RecvError::Closed),
                },
            };
            match received {
                Ok(message) => {
                    if self.address.map_or(true, |a| a == message.address()) {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(HarpError::SessionClosed),
            }
        }
    }

    /// Wait for the next event and decode its value with the device time.
    ///
    /// Fails with `PayloadTypeMismatch` if the event carries no timestamp
    /// or does not decode as `T`.
    pub async fn recv_value<T: PayloadValue>(&mut self) -> Result<Timestamped<T>> {
        self.recv().await?.timestamped_payload()
    }

    /// Wait for the next event and decode its value, ignoring any timestamp.
    pub async fn recv_payload<T: PayloadValue>(&mut self) -> Result<T> {
        self.recv().await?.payload()
    }
}

/// State owned by the reader task.
struct Reader {
    correlator: Arc<Correlator>,
    directory: Arc<RegisterDirectory>,
    events: broadcast::Sender<Message>,
    cancel: CancellationToken,
    sweep_interval: Duration,
}

impl Reader {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: R) {
        let mut frame_buffer = FrameBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = sweep.tick() => {
                    self.correlator.sweep_expired(Instant::now());
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("Device stream closed");
                        self.correlator.close(|| HarpError::SessionClosed);
                        break;
                    }
                    Ok(n) => {
                        for result in frame_buffer.push(&buf[..n]) {
                            match result {
                                Ok(message) => self.handle(message),
                                Err(e) => tracing::warn!("Dropped frame: {}", e),
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Read from device failed: {}", e);
                        self.correlator.close(|| HarpError::transport_from(&e));
                        break;
                    }
                },
            }
        }

        // Stop the writer too; the session is unusable.
        self.cancel.cancel();
    }

    fn handle(&self, message: Message) {
        tracing::debug!(
            "Received {} on register {} ({} bytes)",
            message.message_type(),
            message.address(),
            message.frame_len()
        );

        match self.correlator.dispatch(message) {
            Dispatch::Matched => {}
            Dispatch::Event(event) => self.publish(event),
            Dispatch::Unmatched(reply) => tracing::warn!(
                "Dropped unmatched {} on register {}",
                reply.message_type(),
                reply.address()
            ),
        }
    }

    fn publish(&self, event: Message) {
        let valid = self
            .directory
            .lookup(event.address())
            .and_then(|descriptor| descriptor.validate(&event));
        if let Err(e) = valid {
            tracing::warn!("Dropped event: {}", e);
            return;
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
