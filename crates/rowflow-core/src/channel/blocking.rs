//! Capacity-bounded blocking channel used by threaded runs.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{
    ChannelConfig, ChannelId, ChannelKind, ChannelStats, PutError, PutFailure, RowChannel,
    StatsCounters, StopSignal,
};
use crate::row::Row;

struct State {
    buffer: VecDeque<Row>,
    done: bool,
}

/// Bounded FIFO backed by a mutex-protected ring and two condition variables.
///
/// Producers wait on `not_full`, consumers on `not_empty`. Waits are sliced
/// into `poll_interval` steps so the run-wide stop signal is honored.
pub struct BlockingChannel {
    id: ChannelId,
    capacity: usize,
    poll_interval: Duration,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    stop: StopSignal,
    stats: StatsCounters,
}

impl BlockingChannel {
    /// Creates a channel with `config.capacity` slots.
    #[must_use]
    pub fn new(id: ChannelId, config: ChannelConfig, stop: StopSignal) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            id,
            capacity,
            poll_interval: config.poll_interval,
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                done: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            stop,
            stats: StatsCounters::default(),
        }
    }

    fn put_until(&self, row: Row, deadline: Option<Instant>) -> Result<(), PutError> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if state.done {
                self.stats.record_rejected();
                return Err(PutError::new(row, PutFailure::Done));
            }
            if state.buffer.len() < self.capacity {
                state.buffer.push_back(row);
                drop(state);
                self.not_empty.notify_one();
                self.stats.record_put();
                return Ok(());
            }
            if self.stop.is_stopped() {
                self.stats.record_rejected();
                return Err(PutError::new(row, PutFailure::Stopped));
            }
            let slice = match deadline {
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
            self.not_full.wait_for(&mut state, slice);
        }
    }

    fn get_until(&self, deadline: Option<Instant>) -> Option<Row> {
        let mut state = self.state.lock();
        loop {
            if let Some(row) = state.buffer.pop_front() {
                drop(state);
                self.not_full.notify_one();
                self.stats.record_take();
                return Some(row);
            }
            if state.done || self.stop.is_stopped() {
                return None;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            self.not_empty.wait_for(&mut state, slice);
        }
    }
}

impl RowChannel for BlockingChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Blocking
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn put(&self, row: Row, blocking: bool) -> Result<(), PutError> {
        if blocking {
            return self.put_until(row, None);
        }
        let mut state = self.state.lock();
        if state.done {
            self.stats.record_rejected();
            return Err(PutError::new(row, PutFailure::Done));
        }
        if state.buffer.len() >= self.capacity {
            self.stats.record_rejected();
            return Err(PutError::new(row, PutFailure::Full));
        }
        state.buffer.push_back(row);
        drop(state);
        self.not_empty.notify_one();
        self.stats.record_put();
        Ok(())
    }

    fn put_timeout(&self, row: Row, timeout: Duration) -> Result<(), PutError> {
        self.put_until(row, Some(Instant::now() + timeout))
    }

    fn get(&self, blocking: bool) -> Option<Row> {
        if blocking {
            return self.get_until(None);
        }
        let row = self.state.lock().buffer.pop_front();
        if row.is_some() {
            self.not_full.notify_one();
            self.stats.record_take();
        }
        row
    }

    fn get_timeout(&self, timeout: Duration) -> Option<Row> {
        self.get_until(Some(Instant::now() + timeout))
    }

    fn mark_done(&self) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        state.done = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_done(&self) -> bool {
        self.state.lock().done
    }

    fn size(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for BlockingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingChannel")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
