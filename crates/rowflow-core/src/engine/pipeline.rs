//! A prepared run and its threads.

use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::completion::Completion;
use super::config::{EngineConfig, ExecutionMode};
use super::error::EngineError;
use super::listener::{Listeners, PipelineListener, RunResult};
use super::producer::RowProducer;
use super::state::{ExecutionState, RunPhase};
use crate::channel::{new_channel, ChannelId, ChannelRef};
use crate::graph::PipelineGraph;
use crate::stage::{
    CounterSnapshot, ProcessOutcome, RowListener, RuntimeHandle, StageRuntime, StageSnapshot,
    StageStatus,
};

/// Origin name of row producer channels.
const PRODUCER_ORIGIN: &str = "row-producer";

/// A prepared and initialized pipeline.
///
/// Created by [`Engine::prepare`](super::Engine::prepare). Threaded and
/// serial pipelines are driven by [`Pipeline::start`]; cooperative ones are
/// handed to a [`CooperativeScheduler`](crate::cooperative::CooperativeScheduler).
pub struct Pipeline {
    graph: Arc<PipelineGraph>,
    config: EngineConfig,
    state: Arc<ExecutionState>,
    runtimes: Vec<StageRuntime>,
    handles: Arc<[RuntimeHandle]>,
    listeners: Listeners,
    channels: Vec<ChannelRef>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: bool,
}

/// Pieces of a pipeline taken over by another scheduler.
pub(crate) struct PipelineParts {
    pub(crate) graph: Arc<PipelineGraph>,
    pub(crate) state: Arc<ExecutionState>,
    pub(crate) runtimes: Vec<StageRuntime>,
    pub(crate) handles: Arc<[RuntimeHandle]>,
    pub(crate) listeners: Listeners,
}

impl Pipeline {
    pub(crate) fn new(
        graph: Arc<PipelineGraph>,
        config: EngineConfig,
        state: Arc<ExecutionState>,
        runtimes: Vec<StageRuntime>,
        channels: Vec<ChannelRef>,
    ) -> Self {
        let handles: Arc<[RuntimeHandle]> = runtimes.iter().map(|r| r.handle().clone()).collect();
        Self {
            graph,
            config,
            state,
            runtimes,
            handles,
            listeners: Listeners::default(),
            channels,
            threads: Mutex::new(Vec::new()),
            started: false,
        }
    }

    // ---- Setup ----

    /// The executed graph.
    #[must_use]
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Engine settings of the run.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scheduling model of the run.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.config.execution_mode
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

    /// Channels allocated for the graph's hops.
    #[must_use]
    pub fn channels(&self) -> &[ChannelRef] {
        &self.channels
    }

    /// Registers a run observer.
    pub fn add_listener(&self, listener: Arc<dyn PipelineListener>) {
        self.listeners.add(listener);
    }

    fn runtime_mut(&mut self, stage: &str, copy: usize) -> Result<&mut StageRuntime, EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.runtimes
            .iter_mut()
            .find(|r| r.name() == stage && r.copy() == copy)
            .ok_or_else(|| EngineError::UnknownCopy {
                stage: stage.to_string(),
                copy,
            })
    }

    /// Registers a row observer on one copy. Only before start.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyStarted` or `EngineError::UnknownCopy`.
    pub fn add_row_listener(
        &mut self,
        stage: &str,
        copy: usize,
        listener: Arc<dyn RowListener>,
    ) -> Result<(), EngineError> {
        self.runtime_mut(stage, copy)?
            .context_mut()
            .add_listener(listener);
        Ok(())
    }

    /// Attaches an external row source to one copy. Only before start.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyStarted` or `EngineError::UnknownCopy`.
    pub fn add_row_producer(&mut self, stage: &str, copy: usize) -> Result<RowProducer, EngineError> {
        let kind = self.config.execution_mode.channel_kind();
        let channel_config = self.config.channel_config();
        let stop = self.state.stop_signal().clone();
        let runtime = self.runtime_mut(stage, copy)?;
        let channel = new_channel(
            kind,
            ChannelId::new(PRODUCER_ORIGIN, 0, stage, copy),
            channel_config,
            stop,
        );
        runtime
            .context_mut()
            .add_main_input(PRODUCER_ORIGIN, ChannelRef::clone(&channel));
        debug!(stage, copy, "row producer attached");
        Ok(RowProducer::new(channel))
    }

    pub(crate) fn into_parts(self) -> PipelineParts {
        PipelineParts {
            graph: self.graph,
            state: self.state,
            runtimes: self.runtimes,
            handles: self.handles,
            listeners: self.listeners,
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    // ---- Execution ----

    /// Starts every copy and returns immediately.
    ///
    /// Threaded runs get one thread per copy, serial runs one thread for
    /// all copies. Both report completions to one aggregator thread.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyStarted` on a second call,
    /// `EngineError::WrongMode` for cooperative pipelines and
    /// `EngineError::Spawn` if a thread cannot be created (the run is then
    /// stopped).
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        let mode = self.config.execution_mode;
        if mode == ExecutionMode::Cooperative {
            return Err(EngineError::WrongMode(mode));
        }
        self.started = true;

        let runtimes = std::mem::take(&mut self.runtimes);
        self.state.set_active(runtimes.len());
        self.state.set_running(true);
        info!(copies = runtimes.len(), mode = %mode, "starting pipeline");

        let (events, receiver) = mpsc::channel::<StageSnapshot>();
        let completion = Completion::new(
            Arc::clone(&self.state),
            self.listeners.clone(),
            Arc::clone(&self.handles),
        );
        let aggregator = self.spawn("aggregator".to_string(), move || {
            completion.run(&receiver);
        })?;
        self.threads.lock().push(aggregator);

        let result = match mode {
            ExecutionMode::Serial => self.start_serial(runtimes, &events),
            _ => self.start_threaded(runtimes, &events),
        };
        if result.is_err() {
            self.state.request_stop();
        }
        result?;
        self.listeners.started();
        Ok(())
    }

    fn spawn<F>(&self, suffix: String, body: F) -> Result<JoinHandle<()>, EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{suffix}", self.config.thread_name_prefix);
        thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|source| EngineError::Spawn { name, source })
    }

    fn start_threaded(
        &self,
        runtimes: Vec<StageRuntime>,
        events: &Sender<StageSnapshot>,
    ) -> Result<(), EngineError> {
        for runtime in runtimes {
            let suffix = format!("{}.{}", runtime.name(), runtime.copy());
            let state = Arc::clone(&self.state);
            let events = events.clone();
            let handle = self.spawn(suffix, move || run_copy(runtime, &state, &events))?;
            self.threads.lock().push(handle);
        }
        Ok(())
    }

    fn start_serial(
        &self,
        mut runtimes: Vec<StageRuntime>,
        events: &Sender<StageSnapshot>,
    ) -> Result<(), EngineError> {
        let order = self.graph.execution_order();
        let rank = |r: &StageRuntime| {
            let stage = r.key().stage;
            (
                order.iter().position(|s| *s == stage).unwrap_or(usize::MAX),
                r.copy(),
            )
        };
        runtimes.sort_by_key(rank);

        let state = Arc::clone(&self.state);
        let events = events.clone();
        let handle = self.spawn("serial".to_string(), move || {
            run_serial(runtimes, &state, &events);
        })?;
        self.threads.lock().push(handle);
        Ok(())
    }

    // ---- Control ----

    /// Requests every copy to stop. Blocked channel operations return
    /// within one poll interval.
    pub fn stop_all(&self) {
        if !self.state.is_stopped() {
            info!("stopping all stage copies");
        }
        self.state.request_stop();
    }

    /// Stalls row I/O of every copy.
    pub fn pause_all(&self) {
        self.state.set_paused(true);
        for handle in self.handles.iter() {
            handle
                .status_cell()
                .transition(StageStatus::Running, StageStatus::Paused);
        }
        info!("pipeline paused");
    }

    /// Lifts a pause.
    pub fn resume_all(&self) {
        for handle in self.handles.iter() {
            handle
                .status_cell()
                .transition(StageStatus::Paused, StageStatus::Running);
        }
        self.state.set_paused(false);
        info!("pipeline resumed");
    }

    // ---- Monitoring ----

    /// Returns true from start until every copy completed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Returns true while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    /// Returns true once a stop was requested or a stage failed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Returns true once every copy completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    /// Errors summed over all copies.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.handles.iter().map(RuntimeHandle::errors).sum()
    }

    /// Status and counters of every copy.
    #[must_use]
    pub fn status_snapshot(&self) -> Vec<StageSnapshot> {
        self.handles.iter().map(RuntimeHandle::snapshot).collect()
    }

    /// Counters summed over all copies.
    #[must_use]
    pub fn aggregate_counters(&self) -> CounterSnapshot {
        self.handles.iter().map(|h| h.snapshot().counters).sum()
    }

    /// Current result.
    #[must_use]
    pub fn result(&self) -> RunResult {
        RunResult::collect(&self.state, &self.handles)
    }

    /// Blocks until every copy completed and listeners were notified, then
    /// joins the run threads. Returns at once if the pipeline never started.
    pub fn wait_until_finished(&self) {
        if !self.started {
            return;
        }
        self.state.wait_finished(None);
        self.join_threads();
    }

    /// Like [`Pipeline::wait_until_finished`] with a time limit. Returns
    /// true if the run finished in time.
    pub fn wait_until_finished_timeout(&self, timeout: Duration) -> bool {
        if !self.started {
            return false;
        }
        let finished = self.state.wait_finished(Some(timeout));
        if finished {
            self.join_threads();
        }
        finished
    }

    fn join_threads(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "engine thread panicked");
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("mode", &self.config.execution_mode)
            .field("phase", &self.state.phase())
            .field("copies", &self.handles.len())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

/// Run loop of one copy in a threaded run.
fn run_copy(mut runtime: StageRuntime, state: &ExecutionState, events: &Sender<StageSnapshot>) {
    runtime.start();
    let mut completed = false;
    while !state.is_stopped() {
        if runtime.step() == ProcessOutcome::Done {
            completed = true;
            break;
        }
    }
    let snapshot = runtime.finish(completed);
    // The aggregator only disappears after every copy reported.
    let _ = events.send(snapshot);
}

/// Serial run: every live copy gets one `process_row` call per round, in
/// dependency order. A copy whose backlog into a full slot cannot drain
/// sits the round out.
fn run_serial(runtimes: Vec<StageRuntime>, state: &ExecutionState, events: &Sender<StageSnapshot>) {
    for runtime in &runtimes {
        runtime.start();
    }
    let mut live = runtimes;
    while !live.is_empty() {
        if state.is_stopped() {
            for mut runtime in live.drain(..) {
                let _ = events.send(runtime.finish(false));
            }
            break;
        }
        state.wait_while_paused();

        let mut index = 0;
        while index < live.len() {
            if live[index].step() == ProcessOutcome::Done {
                let mut runtime = live.remove(index);
                let _ = events.send(runtime.finish(true));
            } else {
                index += 1;
            }
        }
    }
}
