//! Dedicated writer task for outbound frames.
//!
//! Callers never touch the transport's write half. Encoded frames go through
//! an mpsc channel to a single writer task, which batches whatever is ready
//! into one vectored write.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Serial port
//! Caller N ─┘
//! ```
//!
//! Every frame carries an acknowledgement channel, so [`WriterHandle::write`]
//! returns only after the frame has been flushed.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HarpError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded frame ready to be written.
///
/// Its acknowledgement is resolved once the batch holding the frame has been
/// flushed, or with the error that stopped the batch.
#[derive(Debug)]
pub struct OutboundFrame {
    bytes: Bytes,
    ack: oneshot::Sender<Result<()>>,
}

impl OutboundFrame {
    pub fn new(bytes: impl Into<Bytes>) -> (Self, oneshot::Receiver<Result<()>>) {
        let (ack, rx) = oneshot::channel();
        let frame = Self {
            bytes: bytes.into(),
            ack,
        };
        (frame, rx)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn complete(self, result: Result<()>) {
        // The caller may have given up waiting.
        let _ = self.ack.send(result);
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheap to clone and shared by all callers of a session.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames queued or being written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue `bytes` and wait until they have been written and flushed.
    ///
    /// Waits for channel capacity first. Fails with `SessionClosed` if the
    /// writer task has stopped, or with `Transport` if the write failed.
    pub async fn write(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let (frame, ack) = OutboundFrame::new(bytes);

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(frame).await.is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            return Err(HarpError::SessionClosed);
        }

        ack.await.map_err(|_| HarpError::SessionClosed)?
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task stops when every handle is dropped, when `cancel` fires, or on
/// the first transport error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    cancel: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(writer_loop(rx, writer, pending, cancel));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Writer cancelled");
                return Ok(());
            }
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => return Ok(()),
            },
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        match result {
            Ok(()) => {
                for frame in batch {
                    frame.complete(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("Write of {} frames failed: {}", batch_size, e);
                for frame in batch {
                    frame.complete(Err(HarpError::transport_from(&e)));
                }
                return Err(HarpError::Transport(e));
            }
        }
    }
}

/// Write a batch of frames using scatter/gather I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;

    for frame in batch {
        let end = start + frame.size();
        if skip_bytes < end {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame.bytes[offset..]));
        }
        start = end;
    }

    slices
}
