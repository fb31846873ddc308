//! Unbounded non-blocking channel used by cooperative runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    ChannelId, ChannelKind, ChannelStats, PutError, PutFailure, RowChannel, StatsCounters,
};
use crate::row::Row;

/// Unbounded FIFO. Neither `put` nor `get` ever waits.
///
/// The cooperative scheduler drives every stage from one thread and decides
/// itself how many calls a stage gets, so there is nothing to wait for.
pub struct QueueChannel {
    id: ChannelId,
    queue: Mutex<VecDeque<Row>>,
    done: AtomicBool,
    stats: StatsCounters,
}

impl QueueChannel {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            done: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    fn push(&self, row: Row) -> Result<(), PutError> {
        if self.is_done() {
            self.stats.record_rejected();
            return Err(PutError::new(row, PutFailure::Done));
        }
        self.queue.lock().push_back(row);
        self.stats.record_put();
        Ok(())
    }
}

impl RowChannel for QueueChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Queue
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn put(&self, row: Row, _blocking: bool) -> Result<(), PutError> {
        self.push(row)
    }

    fn put_timeout(&self, row: Row, _timeout: Duration) -> Result<(), PutError> {
        self.push(row)
    }

    fn get(&self, _blocking: bool) -> Option<Row> {
        let row = self.queue.lock().pop_front();
        if row.is_some() {
            self.stats.record_take();
        }
        row
    }

    fn get_timeout(&self, _timeout: Duration) -> Option<Row> {
        self.get(false)
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn size(&self) -> usize {
        self.queue.lock().len()
    }

    fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for QueueChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueChannel")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;

    #[test]
    fn test_unbounded_and_non_blocking() {
        let ch = QueueChannel::new(ChannelId::new("a", 0, "b", 0));
        for i in 0..50_000 {
            ch.put(Row::new(vec![Value::from(i)]), true).unwrap();
        }
        assert_eq!(ch.size(), 50_000);
        assert_eq!(ch.get(true), Some(Row::new(vec![Value::from(0)])));
        ch.mark_done();
        assert!(!ch.is_drained());
        while ch.get(true).is_some() {}
        assert!(ch.is_drained());
        assert_eq!(ch.stats().rows_taken, 50_000);
    }

    #[test]
    fn test_get_on_empty_returns_immediately() {
        let ch = QueueChannel::new(ChannelId::new("a", 0, "b", 0));
        assert!(ch.get(true).is_none());
        assert!(ch.get_timeout(Duration::from_secs(60)).is_none());
    }
}
