//! Command/reply correlation.
//!
//! Every command sent to the device registers a pending entry keyed by
//! register address. The reader task hands each inbound message to
//! [`Correlator::dispatch`], which resolves the oldest pending command on
//! that address with the same command kind.
//!
//! ```text
//! Caller ──send()──► pending[address].push_back ──► WriterHandle ──► device
//!                                                                     │
//! Caller ◄──oneshot── pending[address].pop (FIFO) ◄── dispatch() ◄── reader
//! ```
//!
//! A pending entry ends in exactly one way: matched by a reply, failed by
//! an error reply, timed out, cancelled, or failed when the session closes.
//! The entry is removed in every case, including when the caller's future
//! is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{HarpError, Result};
use crate::protocol::{Message, MessageType};
use crate::writer::WriterHandle;

/// Outcome of dispatching an inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// Resolved a pending command.
    Matched,
    /// Unsolicited event, not subject to matching.
    Event(Message),
    /// Reply with no pending command.
    Unmatched(Message),
}

struct PendingCommand {
    id: u64,
    kind: MessageType,
    deadline: Instant,
    tx: oneshot::Sender<Result<Message>>,
}

#[derive(Default)]
struct PendingTable {
    by_address: HashMap<u8, VecDeque<PendingCommand>>,
    closed: bool,
}

impl PendingTable {
    fn remove(&mut self, address: u8, id: u64) -> Option<PendingCommand> {
        let queue = self.by_address.get_mut(&address)?;
        let pos = queue.iter().position(|p| p.id == id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            self.by_address.remove(&address);
        }
        entry
    }
}

/// Table of in-flight commands.
pub struct Correlator {
    table: Mutex<PendingTable>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send `request` and wait for its reply.
    ///
    /// Fails with `TimedOut` if no reply arrives within `timeout`, with
    /// `Cancelled` if `cancel` fires first, with `Transport` if the frame
    /// could not be written, and with `DeviceRejected` on an error reply.
    /// A cancelled command may still have reached the device.
    pub async fn send(
        &self,
        writer: &WriterHandle,
        request: Message,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        let address = request.address();
        let kind = request.message_type().command_kind();
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();

        let id = self.register(address, kind, deadline, tx)?;
        let _guard = PendingGuard {
            correlator: self,
            address,
            id,
        };

        tracing::debug!(
            "Sending {} to register {} ({} bytes)",
            kind,
            address,
            request.frame_len()
        );

        let exchange = async {
            writer.write(request.encode()).await?;
            rx.await.map_err(|_| HarpError::SessionClosed)?
        };

        tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                tracing::debug!("Command {} on register {} cancelled", kind, address);
                Err(HarpError::Cancelled)
            }
            result = exchange => result,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("Command {} on register {} timed out", kind, address);
                Err(HarpError::TimedOut)
            }
        }
    }

    fn register(
        &self,
        address: u8,
        kind: MessageType,
        deadline: Instant,
        tx: oneshot::Sender<Result<Message>>,
    ) -> Result<u64> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(HarpError::SessionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table
            .by_address
            .entry(address)
            .or_default()
            .push_back(PendingCommand {
                id,
                kind,
                deadline,
                tx,
            });
        Ok(id)
    }

    /// Route an inbound message to the oldest matching pending command.
    ///
    /// Error-class replies resolve the command with `DeviceRejected`.
    pub fn dispatch(&self, message: Message) -> Dispatch {
        if message.is_event() {
            return Dispatch::Event(message);
        }

        let address = message.address();
        let kind = message.message_type().command_kind();

        let entry = {
            let mut table = self.table.lock();
            let id = table.by_address.get(&address).and_then(|queue| {
                queue
                    .iter()
                    .find(|p| p.kind == kind && !p.tx.is_closed())
                    .map(|p| p.id)
            });
            id.and_then(|id| table.remove(address, id))
        };

        let Some(entry) = entry else {
            return Dispatch::Unmatched(message);
        };

        let result = if message.is_error() {
            Err(HarpError::DeviceRejected {
                address,
                message_type: message.message_type(),
            })
        } else {
            Ok(message)
        };
        let _ = entry.tx.send(result);
        Dispatch::Matched
    }

    /// Fail every command whose deadline is at or before `now`.
    ///
    /// Returns the number of commands failed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        {
            let mut table = self.table.lock();
            table.by_address.retain(|_, queue| {
                let mut i = 0;
                while i < queue.len() {
                    if queue[i].deadline <= now {
                        if let Some(entry) = queue.remove(i) {
                            expired.push(entry);
                        }
                    } else {
                        i += 1;
                    }
                }
                !queue.is_empty()
            });
        }

        let count = expired.len();
        for entry in expired {
            let _ = entry.tx.send(Err(HarpError::TimedOut));
        }
        if count > 0 {
            tracing::warn!("{} commands expired without a reply", count);
        }
        count
    }

    /// Refuse new commands and fail every pending one with `reason()`.
    ///
    /// Returns the number of commands failed.
    pub fn close(&self, reason: impl Fn() -> HarpError) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut table = self.table.lock();
            table.closed = true;
            table
                .by_address
                .drain()
                .flat_map(|(_, queue)| queue)
                .collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(reason()));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Number of commands awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.table.lock().by_address.values().map(VecDeque::len).sum()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the pending entry when `send` returns or its future is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    address: u8,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table.lock().remove(self.address, self.id);
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
