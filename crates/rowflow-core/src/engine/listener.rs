//! Run observers and run results.

use std::sync::Arc;

use parking_lot::Mutex;

use super::state::{ExecutionState, RunPhase};
use crate::stage::{CounterSnapshot, RuntimeHandle, StageSnapshot};

/// Observes run-level events.
///
/// Completion callbacks fire from a single thread: the aggregator thread
/// in threaded and serial runs, the scheduler's caller in cooperative runs.
pub trait PipelineListener: Send + Sync {
    /// Every copy was started.
    fn on_started(&self) {}

    /// One stage copy completed.
    fn on_stage_completed(&self, stage: &StageSnapshot) {
        let _ = stage;
    }

    /// Every stage copy completed.
    fn on_all_completed(&self, result: &RunResult) {
        let _ = result;
    }
}

/// Final or intermediate outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Phase when the result was taken.
    pub status: RunPhase,
    /// Errors summed over all copies.
    pub errors: u64,
    /// Counters summed over all copies.
    pub counters: CounterSnapshot,
    /// Per copy, in preparation order.
    pub stages: Vec<StageSnapshot>,
}

impl RunResult {
    pub(crate) fn collect(state: &ExecutionState, handles: &[RuntimeHandle]) -> Self {
        let stages: Vec<StageSnapshot> = handles.iter().map(RuntimeHandle::snapshot).collect();
        let counters: CounterSnapshot = stages.iter().map(|s| s.counters).sum();
        Self {
            status: state.phase(),
            errors: counters.errors,
            counters,
            stages,
        }
    }

    /// Returns true if every copy finished without errors or a stop.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunPhase::Finished && self.errors == 0
    }

    /// Snapshots of every copy of `stage`.
    pub fn stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a StageSnapshot> + 'a {
        self.stages.iter().filter(move |s| s.name == stage)
    }

    /// Counters summed over every copy of `stage`.
    #[must_use]
    pub fn stage_counters(&self, stage: &str) -> CounterSnapshot {
        self.stage(stage).map(|s| s.counters).sum()
    }
}

/// Listener list shared between a pipeline and its completion tracker.
#[derive(Clone, Default)]
pub(crate) struct Listeners(Arc<Mutex<Vec<Arc<dyn PipelineListener>>>>);

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn PipelineListener>) {
        self.0.lock().push(listener);
    }

    /// Copy of the list, so callbacks run without the lock held.
    pub(crate) fn current(&self) -> Vec<Arc<dyn PipelineListener>> {
        self.0.lock().clone()
    }

    pub(crate) fn started(&self) {
        for listener in self.current() {
            listener.on_started();
        }
    }
}
