//! Execution unit of one stage copy.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::context::StageContext;
use super::counters::{CounterSnapshot, StageCounters};
use super::error::StageError;
use super::status::{AtomicStatus, StageStatus};
use super::{ProcessOutcome, Stage};
use crate::allocator::CopyKey;

/// Point-in-time view of one stage copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// Stage name.
    pub name: String,
    /// Copy index.
    pub copy: usize,
    /// Lifecycle status.
    pub status: StageStatus,
    /// Counter values.
    pub counters: CounterSnapshot,
}

/// Observer handle of a runtime. Stays valid after the runtime moved to
/// its run thread.
#[derive(Clone)]
pub struct RuntimeHandle {
    key: CopyKey,
    name: Arc<str>,
    status: Arc<AtomicStatus>,
    counters: Arc<StageCounters>,
}

impl RuntimeHandle {
    /// Stage id and copy index.
    #[must_use]
    pub fn key(&self) -> CopyKey {
        self.key
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy index.
    #[must_use]
    pub fn copy(&self) -> usize {
        self.key.copy
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status.get()
    }

    pub(crate) fn status_cell(&self) -> &AtomicStatus {
        &self.status
    }

    /// Current error count.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.counters.error_count()
    }

    /// Current counters and status.
    #[must_use]
    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.name.to_string(),
            copy: self.key.copy,
            status: self.status.get(),
            counters: self.counters.snapshot(),
        }
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("name", &self.name)
            .field("copy", &self.key.copy)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

/// A stage instance bound to its context.
pub struct StageRuntime {
    stage: Box<dyn Stage>,
    ctx: StageContext,
    handle: RuntimeHandle,
    disposed: bool,
    /// The stage reported `Done` with rows still backlogged.
    draining: bool,
}

impl StageRuntime {
    pub(crate) fn new(
        key: CopyKey,
        stage: Box<dyn Stage>,
        ctx: StageContext,
        counters: Arc<StageCounters>,
    ) -> Self {
        let handle = RuntimeHandle {
            key,
            name: Arc::from(ctx.name()),
            status: Arc::new(AtomicStatus::default()),
            counters,
        };
        Self {
            stage,
            ctx,
            handle,
            disposed: false,
            draining: false,
        }
    }

    /// Stage id and copy index.
    #[must_use]
    pub fn key(&self) -> CopyKey {
        self.handle.key
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Copy index.
    #[must_use]
    pub fn copy(&self) -> usize {
        self.ctx.copy()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.handle.status()
    }

    /// Observer handle.
    #[must_use]
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// The copy's context.
    #[must_use]
    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub(crate) fn context_mut(&mut self) -> &mut StageContext {
        &mut self.ctx
    }

    /// Returns true if the stage can run cooperatively.
    #[must_use]
    pub fn supports_cooperative(&self) -> bool {
        self.stage.supports_cooperative()
    }

    /// Runs the stage's `init`.
    pub(crate) fn init(&mut self) -> Result<(), StageError> {
        self.handle.status.set(StageStatus::Initializing);
        match self.stage.init(&mut self.ctx) {
            Ok(()) => {
                self.handle.status.set(StageStatus::Idle);
                Ok(())
            }
            Err(e) => {
                self.handle.counters.add_error();
                error!(stage = %self.ctx.name(), copy = self.ctx.copy(), error = %e, "init failed");
                Err(e)
            }
        }
    }

    pub(crate) fn start(&self) {
        self.handle.status.set(StageStatus::Running);
    }

    /// Calls `process_row` once. A failure or panic is logged, counted, and
    /// ends the copy.
    ///
    /// Backlogged rows go out first. While the backlog cannot be flushed the
    /// call is skipped and `Continue` returned, and a `Done` reported with
    /// rows still backlogged is held back until they are written.
    pub(crate) fn step(&mut self) -> ProcessOutcome {
        match self.ctx.flush_backlog() {
            Ok(true) => {}
            Ok(false) => return ProcessOutcome::Continue,
            Err(e) => {
                self.handle.counters.add_error();
                error!(stage = %self.ctx.name(), copy = self.ctx.copy(), error = %e, "stage failed");
                return ProcessOutcome::Done;
            }
        }
        if self.draining {
            return ProcessOutcome::Done;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.stage.process_row(&mut self.ctx)
        }));
        match result {
            Ok(Ok(ProcessOutcome::Done)) if self.ctx.backlog_len() > 0 => {
                self.draining = true;
                ProcessOutcome::Continue
            }
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.handle.counters.add_error();
                error!(stage = %self.ctx.name(), copy = self.ctx.copy(), error = %e, "stage failed");
                ProcessOutcome::Done
            }
            Err(_) => {
                self.handle.counters.add_error();
                error!(stage = %self.ctx.name(), copy = self.ctx.copy(), "stage panicked");
                ProcessOutcome::Done
            }
        }
    }

    /// Calls `batch_complete` once. Returns false if it failed.
    pub(crate) fn batch_complete(&mut self) -> bool {
        match self.stage.batch_complete(&mut self.ctx) {
            Ok(()) => true,
            Err(e) => {
                self.handle.counters.add_error();
                error!(stage = %self.ctx.name(), copy = self.ctx.copy(), error = %e, "batch completion failed");
                false
            }
        }
    }

    /// Marks outputs done, disposes the stage and records the final status.
    ///
    /// `completed` is true when the stage reported `Done` on its own.
    pub(crate) fn finish(&mut self, completed: bool) -> StageSnapshot {
        self.ctx.mark_outputs_done();
        self.dispose();
        let status = if completed && self.handle.errors() == 0 && !self.ctx.is_stopped() {
            StageStatus::Finished
        } else {
            StageStatus::Stopped
        };
        self.handle.status.set(status);
        debug!(stage = %self.ctx.name(), copy = self.ctx.copy(), %status, "copy finished");
        self.handle.snapshot()
    }

    /// Tears down a copy whose run never started.
    pub(crate) fn halt(&mut self, status: StageStatus) {
        self.ctx.mark_outputs_done();
        self.dispose();
        self.handle.status.set(status);
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.stage.dispose(&mut self.ctx);
        }
    }
}

impl fmt::Debug for StageRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRuntime")
            .field("handle", &self.handle)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
