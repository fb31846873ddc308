//! # Row Channels
//!
//! Bounded FIFO queues connecting exactly one producing stage copy to one
//! consuming stage copy.
//!
//! ## Contract
//!
//! | Operation          | Behavior |
//! |--------------------|----------|
//! | `put(row, true)`   | waits for space; fails only when the run is stopped |
//! | `put(row, false)`  | fails fast with `PutFailure::Full` |
//! | `put_timeout`      | waits at most the given duration |
//! | `get(true)`        | waits while empty and not done; `None` once done and drained |
//! | `mark_done`        | producer signal; wakes blocked peers; never cleared |
//!
//! Rows within one channel keep producer order. Blocked operations re-check
//! the shared [`StopSignal`] every `poll_interval`, so stopping a run never
//! leaves a thread parked on a channel.
//!
//! ## Flavors
//!
//! ```text
//! Threaded run     ──▶ BlockingChannel  (bounded, `row_set_size`)
//! Serial run       ──▶ HandoffChannel   (single slot)
//! Cooperative run  ──▶ QueueChannel     (unbounded, never blocks)
//! ```
//!
//! The flavor is chosen once per run from its execution mode.

mod blocking;
pub mod config;
mod error;
mod handoff;
mod queue;

pub use blocking::BlockingChannel;
pub use config::ChannelConfig;
pub use error::{PutError, PutFailure};
pub use handoff::HandoffChannel;
pub use queue::QueueChannel;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::row::Row;

/// Identity of a channel: the producing and consuming stage copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    /// Producing stage name.
    pub origin: String,
    /// Producing copy index.
    pub origin_copy: usize,
    /// Consuming stage name.
    pub destination: String,
    /// Consuming copy index.
    pub destination_copy: usize,
}

impl ChannelId {
    /// Creates a channel identity.
    #[must_use]
    pub fn new(
        origin: impl Into<String>,
        origin_copy: usize,
        destination: impl Into<String>,
        destination_copy: usize,
    ) -> Self {
        Self {
            origin: origin.into(),
            origin_copy,
            destination: destination.into(),
            destination_copy,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} - {}.{}",
            self.origin, self.origin_copy, self.destination, self.destination_copy
        )
    }
}

/// Channel implementation selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Capacity-bounded blocking queue.
    Blocking,
    /// Single-slot handoff.
    Handoff,
    /// Unbounded queue that never blocks.
    Queue,
}

/// Run-wide stop flag observed by blocked channel operations.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Creates a cleared signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Idempotent.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once the signal was raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Point-in-time channel statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Rows successfully enqueued.
    pub rows_put: u64,
    /// Rows dequeued.
    pub rows_taken: u64,
    /// Puts that had to wait for space at least once.
    pub puts_blocked: u64,
    /// Puts that returned an error.
    pub puts_rejected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    rows_put: AtomicU64,
    rows_taken: AtomicU64,
    puts_blocked: AtomicU64,
    puts_rejected: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_put(&self) {
        self.rows_put.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_take(&self) {
        self.rows_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocked(&self) {
        self.puts_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.puts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            rows_put: self.rows_put.load(Ordering::Relaxed),
            rows_taken: self.rows_taken.load(Ordering::Relaxed),
            puts_blocked: self.puts_blocked.load(Ordering::Relaxed),
            puts_rejected: self.puts_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A FIFO queue between one producer and one consumer.
pub trait RowChannel: Send + Sync + fmt::Debug {
    /// Returns the channel identity.
    fn id(&self) -> &ChannelId;

    /// Returns the implementation flavor.
    fn kind(&self) -> ChannelKind;

    /// Maximum number of buffered rows, `None` when unbounded.
    fn capacity(&self) -> Option<usize>;

    /// Enqueues a row, waiting for space when `blocking` is set.
    ///
    /// # Errors
    ///
    /// Returns the row with `PutFailure::Full` (non-blocking, no space),
    /// `PutFailure::Stopped` (run stopped while waiting) or
    /// `PutFailure::Done` (channel already done).
    fn put(&self, row: Row, blocking: bool) -> Result<(), PutError>;

    /// Enqueues a row, waiting at most `timeout` for space.
    ///
    /// # Errors
    ///
    /// Returns the row with `PutFailure::Timeout` when the wait elapsed, or
    /// the same failures as [`RowChannel::put`].
    fn put_timeout(&self, row: Row, timeout: Duration) -> Result<(), PutError>;

    /// Dequeues the oldest row.
    ///
    /// With `blocking` set, waits while the channel is empty and not done.
    /// Returns `None` once the channel is done and drained, when the run is
    /// stopped, or immediately when empty and not blocking.
    fn get(&self, blocking: bool) -> Option<Row>;

    /// Dequeues the oldest row, waiting at most `timeout`.
    fn get_timeout(&self, timeout: Duration) -> Option<Row>;

    /// Signals that no more rows will be produced.
    fn mark_done(&self);

    /// Returns true once the producer marked the channel done.
    fn is_done(&self) -> bool;

    /// Number of rows currently buffered.
    fn size(&self) -> usize;

    /// Returns true when the channel is done and has no buffered rows.
    fn is_drained(&self) -> bool {
        self.is_done() && self.size() == 0
    }

    /// Returns a statistics snapshot.
    fn stats(&self) -> ChannelStats;
}

/// Shared handle to a channel.
pub type ChannelRef = Arc<dyn RowChannel>;

/// Creates a channel of the given flavor.
#[must_use]
pub fn new_channel(
    kind: ChannelKind,
    id: ChannelId,
    config: ChannelConfig,
    stop: StopSignal,
) -> ChannelRef {
    match kind {
        ChannelKind::Blocking => Arc::new(BlockingChannel::new(id, config, stop)),
        ChannelKind::Handoff => Arc::new(HandoffChannel::new(id, config.poll_interval, stop)),
        ChannelKind::Queue => Arc::new(QueueChannel::new(id)),
    }
}
