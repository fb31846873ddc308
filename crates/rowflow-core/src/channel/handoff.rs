//! Single-slot handoff channel used by serial single-threaded runs.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{
    ChannelId, ChannelKind, ChannelStats, PutError, PutFailure, RowChannel, StatsCounters,
    StopSignal,
};
use crate::row::Row;

struct Slot {
    row: Option<Row>,
    done: bool,
}

/// Holds at most one row.
///
/// In a serial run the producer and consumer share one thread, so stages
/// put with `blocking == false` and the consumer runs next in sorted order.
/// Blocking operations still work across threads.
pub struct HandoffChannel {
    id: ChannelId,
    poll_interval: Duration,
    slot: Mutex<Slot>,
    changed: Condvar,
    stop: StopSignal,
    stats: StatsCounters,
}

impl HandoffChannel {
    /// Creates an empty handoff slot.
    #[must_use]
    pub fn new(id: ChannelId, poll_interval: Duration, stop: StopSignal) -> Self {
        Self {
            id,
            poll_interval,
            slot: Mutex::new(Slot {
                row: None,
                done: false,
            }),
            changed: Condvar::new(),
            stop,
            stats: StatsCounters::default(),
        }
    }

    fn put_until(&self, row: Row, blocking: bool, deadline: Option<Instant>) -> Result<(), PutError> {
        let mut slot = self.slot.lock();
        let mut waited = false;
        loop {
            if slot.done {
                self.stats.record_rejected();
                return Err(PutError::new(row, PutFailure::Done));
            }
            if slot.row.is_none() {
                slot.row = Some(row);
                drop(slot);
                self.changed.notify_all();
                self.stats.record_put();
                return Ok(());
            }
            if !blocking {
                self.stats.record_rejected();
                return Err(PutError::new(row, PutFailure::Full));
            }
            if self.stop.is_stopped() {
                self.stats.record_rejected();
                return Err(PutError::new(row, PutFailure::Stopped));
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.stats.record_rejected();
                        return Err(PutError::new(row, PutFailure::Timeout));
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            if !waited {
                waited = true;
                self.stats.record_blocked();
            }
            self.changed.wait_for(&mut slot, wait);
        }
    }

    fn get_until(&self, blocking: bool, deadline: Option<Instant>) -> Option<Row> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(row) = slot.row.take() {
                drop(slot);
                self.changed.notify_all();
                self.stats.record_take();
                return Some(row);
            }
            if !blocking || slot.done || self.stop.is_stopped() {
                return None;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            self.changed.wait_for(&mut slot, wait);
        }
    }
}

impl RowChannel for HandoffChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Handoff
    }

    fn capacity(&self) -> Option<usize> {
        Some(1)
    }

    fn put(&self, row: Row, blocking: bool) -> Result<(), PutError> {
        self.put_until(row, blocking, None)
    }

    fn put_timeout(&self, row: Row, timeout: Duration) -> Result<(), PutError> {
        self.put_until(row, true, Some(Instant::now() + timeout))
    }

    fn get(&self, blocking: bool) -> Option<Row> {
        self.get_until(blocking, None)
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Row> {
        self.get_until(true, Some(Instant::now() + timeout))
    }

    fn mark_done(&self) {
        let mut slot = self.slot.lock();
        if !slot.done {
            slot.done = true;
            drop(slot);
            self.changed.notify_all();
        }
    }

    fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    fn size(&self) -> usize {
        usize::from(self.slot.lock().row.is_some())
    }

    fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for HandoffChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffChannel")
            .field("id", &self.id)
            .field("occupied", &(self.size() == 1))
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
