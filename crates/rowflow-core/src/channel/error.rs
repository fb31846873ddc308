//! Channel error types.

use crate::row::Row;

/// Reason a `put` did not enqueue its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PutFailure {
    /// Channel is full and the caller asked not to wait.
    #[error("channel is full")]
    Full,

    /// Bounded wait elapsed before space became available.
    #[error("timed out waiting for channel space")]
    Timeout,

    /// The run was stopped while waiting.
    #[error("run stopped while waiting for channel space")]
    Stopped,

    /// The producer already marked the channel done.
    #[error("channel is done")]
    Done,
}

/// Error returned from `put` operations.
///
/// Hands the row back to the caller so it can retry or treat the failure
/// as backpressure.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct PutError {
    /// The row that could not be enqueued.
    pub row: Row,
    /// Why the row was rejected.
    pub reason: PutFailure,
}

impl PutError {
    pub(crate) fn new(row: Row, reason: PutFailure) -> Self {
        Self { row, reason }
    }

    /// Returns true if the put timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.reason == PutFailure::Timeout
    }

    /// Returns true if a non-blocking put found the channel full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.reason == PutFailure::Full
    }

    /// Returns true if the run was stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.reason == PutFailure::Stopped
    }

    /// Returns the rejected row.
    #[must_use]
    pub fn into_row(self) -> Row {
        self.row
    }
}
