//! In-memory fake device for session tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use harp_client::codec::PayloadValue;
use harp_client::devices::DeviceProfile;
use harp_client::protocol::{FrameBuffer, Message, MessageType};
use harp_client::registers::common::WHO_AM_I;
use harp_client::{Session, SessionBuilder};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Device clock reported in every reply.
pub const DEVICE_SECONDS: f64 = 12.5;

const WAIT: Duration = Duration::from_secs(5);

/// The device end of a duplex stream, driven step by step by the test.
pub struct FakeDevice {
    stream: DuplexStream,
    buffer: FrameBuffer,
    ready: VecDeque<Message>,
}

impl FakeDevice {
    /// Create a connected (host stream, device) pair.
    pub fn pair() -> (DuplexStream, FakeDevice) {
        let (host, device) = duplex(4096);
        let device = FakeDevice {
            stream: device,
            buffer: FrameBuffer::new(),
            ready: VecDeque::new(),
        };
        (host, device)
    }

    /// Wait for the next frame from the host.
    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.read_message())
            .await
            .expect("host sent nothing")
    }

    /// Wait briefly and report whether the host sent anything.
    pub async fn try_next_message(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.read_message()).await.ok()
    }

    async fn read_message(&mut self) -> Message {
        let mut buf = [0u8; 512];
        loop {
            if let Some(message) = self.ready.pop_front() {
                return message;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "host closed the stream");
            for result in self.buffer.push(&buf[..n]) {
                self.ready.push_back(result.unwrap());
            }
        }
    }

    pub async fn send(&mut self, message: &Message) {
        self.send_raw(&message.encode()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Answer `request` with `value`, timestamped like a real device.
    pub async fn reply<T: PayloadValue>(&mut self, request: &Message, value: T) {
        let reply = Message::from_timestamped_payload(
            request.address(),
            DEVICE_SECONDS,
            request.message_type(),
            &value,
        )
        .unwrap();
        self.send(&reply).await;
    }

    /// Acknowledge a write by echoing its payload.
    pub async fn ack(&mut self, request: &Message) {
        let ack = Message::new(
            request.address(),
            request.message_type(),
            request.payload_type(),
            Bytes::copy_from_slice(request.payload_bytes()),
            Some(harp_client::protocol::Timestamp::from_seconds(DEVICE_SECONDS)),
        )
        .unwrap();
        self.send(&ack).await;
    }

    /// Answer `request` with an error-class reply.
    pub async fn reject(&mut self, request: &Message) {
        let message_type = match request.message_type() {
            MessageType::Write => MessageType::WriteError,
            _ => MessageType::ReadError,
        };
        let reply = Message::new(
            request.address(),
            message_type,
            request.payload_type(),
            Bytes::new(),
            None,
        )
        .unwrap();
        self.send(&reply).await;
    }

    /// Publish an event.
    pub async fn event<T: PayloadValue>(&mut self, address: u8, seconds: f64, value: T) {
        let event =
            Message::from_timestamped_payload(address, seconds, MessageType::Event, &value)
                .unwrap();
        self.send(&event).await;
    }

    /// Answer the identity read with `who_am_i`.
    pub async fn answer_identity(&mut self, who_am_i: u16) {
        let request = self.next_message().await;
        assert_eq!(request.address(), WHO_AM_I);
        assert_eq!(request.message_type(), MessageType::Read);
        self.reply(&request, who_am_i).await;
    }
}

/// Builder with test-friendly timeouts.
pub fn builder(profile: DeviceProfile) -> SessionBuilder {
    Session::builder(profile)
        .reply_timeout(Duration::from_secs(2))
        .sweep_interval(Duration::from_millis(10))
}

/// Open a session to a fake device that identifies as the profile expects.
pub async fn connect(builder: SessionBuilder, who_am_i: u16) -> (Session, FakeDevice) {
    let (host, mut device) = FakeDevice::pair();
    let connect = tokio::spawn(builder.connect(host));
    device.answer_identity(who_am_i).await;
    let session = connect.await.unwrap().unwrap();
    (session, device)
}

/// Open a FastStepper session.
pub async fn connect_stepper() -> (Session, FakeDevice) {
    connect(builder(DeviceProfile::fast_stepper().unwrap()), 2120).await
}
