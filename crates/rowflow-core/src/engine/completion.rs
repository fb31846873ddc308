//! Completion tracking shared by all schedulers.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing::{info, warn};

use super::listener::{Listeners, RunResult};
use super::state::ExecutionState;
use crate::stage::{RuntimeHandle, StageSnapshot};

/// Counts completed copies, applies fail-fast and settles the run.
pub(crate) struct Completion {
    state: Arc<ExecutionState>,
    listeners: Listeners,
    handles: Arc<[RuntimeHandle]>,
    total: usize,
    finalized: bool,
}

impl Completion {
    pub(crate) fn new(
        state: Arc<ExecutionState>,
        listeners: Listeners,
        handles: Arc<[RuntimeHandle]>,
    ) -> Self {
        let total = handles.len();
        Self {
            state,
            listeners,
            handles,
            total,
            finalized: false,
        }
    }

    /// Records one completed copy. Returns true once every copy completed.
    pub(crate) fn record(&self, snapshot: &StageSnapshot) -> bool {
        let finished = self.state.copy_finished();
        info!(
            stage = %snapshot.name,
            copy = snapshot.copy,
            status = %snapshot.status,
            errors = snapshot.counters.errors,
            read = snapshot.counters.lines_read,
            written = snapshot.counters.lines_written,
            "stage copy finished"
        );
        for listener in self.listeners.current() {
            listener.on_stage_completed(snapshot);
        }
        if snapshot.counters.errors > 0 && !self.state.is_stopped() {
            warn!(
                stage = %snapshot.name,
                copy = snapshot.copy,
                errors = snapshot.counters.errors,
                "stage finished with errors, stopping the run"
            );
            self.state.request_stop();
        }
        finished >= self.total
    }

    /// Marks the run finished, notifies listeners and releases waiters.
    /// Runs once.
    pub(crate) fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.state.set_finished();
        let result = RunResult::collect(&self.state, &self.handles);
        info!(
            status = %result.status,
            errors = result.errors,
            copies = result.stages.len(),
            "run finished"
        );
        for listener in self.listeners.current() {
            listener.on_all_completed(&result);
        }
        self.state.settle();
    }

    /// Aggregator loop: consumes completion events until every copy
    /// reported or every sender is gone, then finalizes.
    pub(crate) fn run(mut self, events: &Receiver<StageSnapshot>) {
        for snapshot in events {
            if self.record(&snapshot) {
                break;
            }
        }
        self.finalize();
    }
}
