//! External row injection.

use std::fmt;
use std::time::Duration;

use crate::channel::{ChannelId, ChannelRef, PutError, RowChannel};
use crate::row::Row;

/// Feeds rows from outside the pipeline into one stage copy.
///
/// The rows arrive on an extra main input of the copy. Call
/// [`RowProducer::finished`] after the last row; dropping the producer
/// finishes it as well.
pub struct RowProducer {
    channel: ChannelRef,
}

impl RowProducer {
    pub(crate) fn new(channel: ChannelRef) -> Self {
        Self { channel }
    }

    /// Identity of the injection channel.
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        self.channel.id()
    }

    /// Puts a row, waiting for space when `blocking` is set.
    ///
    /// # Errors
    ///
    /// Returns the row with the failure reason: `Full` (non-blocking),
    /// `Stopped` (run stopped) or `Done` (already finished).
    pub fn put_row(&self, row: Row, blocking: bool) -> Result<(), PutError> {
        self.channel.put(row, blocking)
    }

    /// Puts a row, waiting at most `timeout` for space.
    ///
    /// # Errors
    ///
    /// Returns the row with `Timeout` when no space appeared in time, or
    /// the failures of [`RowProducer::put_row`].
    pub fn put_row_timeout(&self, row: Row, timeout: Duration) -> Result<(), PutError> {
        self.channel.put_timeout(row, timeout)
    }

    /// Signals that no more rows follow.
    pub fn finished(&self) {
        self.channel.mark_done();
    }

    /// Rows waiting to be read by the stage.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.channel.size()
    }
}

impl Drop for RowProducer {
    fn drop(&mut self) {
        self.channel.mark_done();
    }
}

impl fmt::Debug for RowProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowProducer")
            .field("channel", self.channel.id())
            .field("buffered", &self.channel.size())
            .finish()
    }
}
