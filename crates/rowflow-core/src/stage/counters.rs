//! Per-copy row counters.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters of one stage copy.
///
/// Written only by the copy's own thread and read by observers. All
/// accesses use `Ordering::Relaxed`; the values are advisory.
#[derive(Debug, Default)]
pub struct StageCounters {
    /// Rows taken from input channels.
    pub lines_read: AtomicU64,
    /// Rows put on output channels.
    pub lines_written: AtomicU64,
    /// Rows read from an external source (files, databases).
    pub lines_input: AtomicU64,
    /// Rows written to an external target.
    pub lines_output: AtomicU64,
    /// Rows updated in an external target.
    pub lines_updated: AtomicU64,
    /// Rows sent to the error output.
    pub lines_rejected: AtomicU64,
    /// Rows skipped.
    pub lines_skipped: AtomicU64,
    /// Errors raised by the copy.
    pub errors: AtomicU64,
}

impl StageCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to `counter`.
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one more error.
    pub fn add_error(&self) {
        Self::bump(&self.errors);
    }

    /// Raises the error count to at least `errors`.
    pub fn ensure_errors(&self, errors: u64) {
        self.errors.fetch_max(errors, Ordering::Relaxed);
    }

    /// Current error count.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_written: self.lines_written.load(Ordering::Relaxed),
            lines_input: self.lines_input.load(Ordering::Relaxed),
            lines_output: self.lines_output.load(Ordering::Relaxed),
            lines_updated: self.lines_updated.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of [`StageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Rows read.
    pub lines_read: u64,
    /// Rows written.
    pub lines_written: u64,
    /// Rows input.
    pub lines_input: u64,
    /// Rows output.
    pub lines_output: u64,
    /// Rows updated.
    pub lines_updated: u64,
    /// Rows rejected.
    pub lines_rejected: u64,
    /// Rows skipped.
    pub lines_skipped: u64,
    /// Errors.
    pub errors: u64,
}

impl AddAssign for CounterSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        self.lines_read += rhs.lines_read;
        self.lines_written += rhs.lines_written;
        self.lines_input += rhs.lines_input;
        self.lines_output += rhs.lines_output;
        self.lines_updated += rhs.lines_updated;
        self.lines_rejected += rhs.lines_rejected;
        self.lines_skipped += rhs.lines_skipped;
        self.errors += rhs.errors;
    }
}

impl std::iter::Sum for CounterSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}
