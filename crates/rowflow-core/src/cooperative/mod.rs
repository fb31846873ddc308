//! # Cooperative Scheduling
//!
//! Runs every stage copy of a cooperative pipeline on the caller's thread.
//!
//! Copies are ordered once, so a producer always runs before its
//! consumers: the order is a stable dependency sort over the graph's
//! reachability closure. Each [`CooperativeScheduler::one_iteration`] makes
//! one pass over the order:
//!
//! 1. Info inputs with buffered rows are drained first.
//! 2. A copy without main inputs is called until it reports `Done`.
//! 3. Any other copy is called once per buffered main row. When nothing is
//!    buffered and every main input is done, it is called once more so it
//!    can observe the end of its input.
//! 4. `batch_complete` closes the pass.
//!
//! A copy that reported `Done` marks its outputs done and is disposed.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{
    Completion, EngineError, ExecutionMode, ExecutionState, Pipeline, PipelineParts, RunResult,
};
use crate::graph::{stable_dependency_order, Reachability};
use crate::stage::{ProcessOutcome, RuntimeHandle, StageRuntime};

/// One copy in the scheduler's order.
struct Slot {
    runtime: StageRuntime,
    done: bool,
}

/// Single-threaded scheduler for cooperative pipelines.
pub struct CooperativeScheduler {
    slots: Vec<Slot>,
    state: Arc<ExecutionState>,
    handles: Arc<[RuntimeHandle]>,
    completion: Completion,
    remaining: usize,
    iterations: u64,
    disposed: bool,
}

impl CooperativeScheduler {
    /// Takes over a prepared cooperative pipeline and starts its copies.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WrongMode` if the pipeline was prepared for
    /// another mode, `EngineError::AlreadyStarted` if it was started, and
    /// `EngineError::Configuration` if a stage cannot run cooperatively.
    pub fn new(pipeline: Pipeline) -> Result<Self, EngineError> {
        let mode = pipeline.mode();
        if mode != ExecutionMode::Cooperative {
            return Err(EngineError::WrongMode(mode));
        }
        if pipeline.is_started() {
            return Err(EngineError::AlreadyStarted);
        }
        let PipelineParts {
            graph,
            state,
            mut runtimes,
            handles,
            listeners,
        } = pipeline.into_parts();

        if let Some(runtime) = runtimes.iter().find(|r| !r.supports_cooperative()) {
            return Err(EngineError::Configuration(format!(
                "stage {} cannot run cooperatively",
                runtime.name()
            )));
        }

        runtimes.sort_by_key(StageRuntime::key);
        let reach = Reachability::compute(&graph);
        let ordered = stable_dependency_order(runtimes, |a, b| {
            reach.is_before(a.key().stage, b.key().stage)
        });
        debug!(
            order = ?ordered.iter().map(|r| format!("{}.{}", r.name(), r.copy())).collect::<Vec<_>>(),
            "cooperative order"
        );

        let slots: Vec<Slot> = ordered
            .into_iter()
            .map(|runtime| Slot {
                runtime,
                done: false,
            })
            .collect();
        for slot in &slots {
            slot.runtime.start();
        }
        state.set_active(slots.len());
        state.set_running(true);
        info!(copies = slots.len(), "cooperative run started");
        listeners.started();

        let remaining = slots.len();
        let completion = Completion::new(Arc::clone(&state), listeners, Arc::clone(&handles));
        Ok(Self {
            slots,
            state,
            handles,
            completion,
            remaining,
            iterations: 0,
            disposed: false,
        })
    }

    /// Stage name and copy index of every copy, in scheduling order.
    #[must_use]
    pub fn order(&self) -> Vec<(String, usize)> {
        self.slots
            .iter()
            .map(|s| (s.runtime.name().to_string(), s.runtime.copy()))
            .collect()
    }

    /// Shared run state.
    #[must_use]
    pub fn execution_state(&self) -> &Arc<ExecutionState> {
        &self.state
    }

    /// Observer handles of every copy, in preparation order.
    #[must_use]
    pub fn handles(&self) -> &[RuntimeHandle] {
        &self.handles
    }

    /// Completed passes.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Requests the run to stop. The next pass ends every copy.
    pub fn stop_all(&self) {
        self.state.request_stop();
    }

    /// Makes one pass over every live copy.
    ///
    /// Returns true while copies remain and the run was not stopped.
    pub fn one_iteration(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.iterations += 1;

        for index in 0..self.slots.len() {
            if self.state.is_stopped() {
                break;
            }
            if self.slots[index].done {
                continue;
            }
            let completed = Self::run_slot(&mut self.slots[index].runtime, &self.state);
            if completed {
                self.complete(index, true);
            }
        }

        if self.state.is_stopped() {
            self.stop_remaining();
            return false;
        }
        self.remaining > 0
    }

    /// One pass over a single copy. Returns true if the copy is done.
    ///
    /// `batch_complete` runs once at the end of every pass that was not cut
    /// short by a stop, including the pass in which the copy finishes.
    fn run_slot(runtime: &mut StageRuntime, state: &ExecutionState) -> bool {
        let mut completed = false;

        // Info rows first: lookups must be loaded before main rows arrive.
        loop {
            let buffered = runtime.context().buffered_info_rows();
            if buffered == 0 || state.is_stopped() {
                break;
            }
            if runtime.step() == ProcessOutcome::Done {
                completed = true;
                break;
            }
            if runtime.context().buffered_info_rows() >= buffered {
                // The stage did not consume info rows this call.
                break;
            }
        }

        if !completed && runtime.context().had_main_inputs() {
            let buffered = runtime.context().buffered_main_rows();
            let calls = if buffered == 0 && runtime.context().main_inputs_done() {
                1
            } else {
                buffered
            };
            for _ in 0..calls {
                if state.is_stopped() {
                    break;
                }
                if runtime.step() == ProcessOutcome::Done {
                    completed = true;
                    break;
                }
            }
        } else if !completed {
            while !state.is_stopped() {
                if runtime.step() == ProcessOutcome::Done {
                    completed = true;
                    break;
                }
            }
        }

        if state.is_stopped() {
            return false;
        }
        let batch_ok = runtime.batch_complete();
        completed || !batch_ok
    }

    fn complete(&mut self, index: usize, completed: bool) {
        let slot = &mut self.slots[index];
        slot.done = true;
        self.remaining -= 1;
        let snapshot = slot.runtime.finish(completed);
        self.completion.record(&snapshot);
    }

    fn stop_remaining(&mut self) {
        for index in 0..self.slots.len() {
            if !self.slots[index].done {
                self.complete(index, false);
            }
        }
    }

    /// Runs passes until every copy completed or the run stopped, then
    /// disposes the scheduler.
    pub fn run(&mut self) -> RunResult {
        while self.one_iteration() {}
        self.dispose();
        self.result()
    }

    /// Ends every live copy and settles the run. Runs once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if self.remaining > 0 {
            self.stop_remaining();
        }
        self.completion.finalize();
        debug!(iterations = self.iterations, "cooperative scheduler disposed");
    }

    /// Current result.
    #[must_use]
    pub fn result(&self) -> RunResult {
        RunResult::collect(&self.state, &self.handles)
    }
}

impl Drop for CooperativeScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CooperativeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeScheduler")
            .field("copies", &self.slots.len())
            .field("remaining", &self.remaining)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
