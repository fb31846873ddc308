//! # Stages
//!
//! A stage is the unit of processing logic. The engine runs one
//! [`StageRuntime`] per stage copy; the runtime pairs a [`Stage`] instance
//! with the [`StageContext`] that owns the copy's channel ends.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──init──▶ Idle ──start──▶ Running ⇄ Paused
//!   │                               │
//!   │ init failed                   ├──▶ Finished  (Done, no errors)
//!   ▼                               └──▶ Stopped   (stop request or error)
//! Stopped / Halted (init barrier failed elsewhere)
//! ```
//!
//! `process_row` is called repeatedly. Each call handles at most a few rows
//! and reports whether the stage wants more calls. The same trait serves
//! the threaded, serial and cooperative schedulers: a stage that only reads
//! through the context and reports [`StageContext::outcome_when_idle`] when
//! no row is available works under all three.

mod builtin;
mod context;
mod counters;
mod error;
mod listener;
mod registry;
mod runtime;
mod status;

pub use builtin::{Discard, Passthrough, RejectFilter, RowGenerator};
pub use context::{error_row_fields, PartitionSlot, StageContext, ERROR_FIELDS, ROWS_PER_BLOCK};
pub use counters::{CounterSnapshot, StageCounters};
pub use error::StageError;
pub use listener::RowListener;
pub use registry::{StageFactory, StageRegistry};
pub use runtime::{RuntimeHandle, StageRuntime, StageSnapshot};
pub use status::{AtomicStatus, StageStatus};

pub(crate) use context::{ContextParts, OutputRoute, Routing};

/// Result of one `process_row` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Call again.
    Continue,
    /// The stage has finished its work.
    Done,
}

/// Processing logic of one stage type.
///
/// One instance exists per stage copy, created by the
/// [`StageRegistry`]. Only `process_row` is required.
pub trait Stage: Send {
    /// Prepares the copy. Runs on its own thread, in parallel with the
    /// other copies' `init`.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole run before a single row moves.
    fn init(&mut self, ctx: &mut StageContext) -> Result<(), StageError> {
        let _ = ctx;
        Ok(())
    }

    /// Processes the next row, or a small batch of rows.
    ///
    /// # Errors
    ///
    /// An error ends the copy, is counted on it, and stops the run.
    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError>;

    /// Called by the cooperative scheduler after each pass over the copy.
    ///
    /// # Errors
    ///
    /// Treated like a `process_row` error.
    fn batch_complete(&mut self, ctx: &mut StageContext) -> Result<(), StageError> {
        let _ = ctx;
        Ok(())
    }

    /// Releases resources. Called exactly once, after the last
    /// `process_row`, or after `init` when the run never starts.
    fn dispose(&mut self, ctx: &mut StageContext) {
        let _ = ctx;
    }

    /// Returns true if the stage can run under the cooperative scheduler,
    /// which needs `process_row` to return instead of waiting for rows.
    fn supports_cooperative(&self) -> bool {
        false
    }
}
