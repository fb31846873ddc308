//! Row-level observation hooks.

use crate::row::Row;

/// Observes the rows one stage copy reads and writes.
///
/// Callbacks run synchronously on the copy's thread, so they delay the
/// copy's row I/O. All methods default to no-ops.
pub trait RowListener: Send + Sync {
    /// A row was taken from a main or info input.
    fn on_row_read(&self, row: &Row) {
        let _ = row;
    }

    /// A row was put on the outputs.
    fn on_row_written(&self, row: &Row) {
        let _ = row;
    }

    /// A row was sent to the error output, error fields included.
    fn on_error_row(&self, row: &Row) {
        let _ = row;
    }
}
