//! Run-wide execution state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::StopSignal;

/// Coarse phase of a run, derived from the [`ExecutionState`] flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Prepared, not yet initialized.
    Preparing,
    /// Stage copies are initializing.
    Initializing,
    /// Stage copies are running.
    Running,
    /// Running, with row I/O stalled.
    Paused,
    /// A stop was requested or a stage failed.
    Stopped,
    /// Every stage copy completed.
    Finished,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "Preparing",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Flags and counts shared by every thread of one run.
///
/// The stop flag is the same [`StopSignal`] the run's channels observe, so
/// raising it also releases threads blocked on channel operations.
pub struct ExecutionState {
    stop: StopSignal,
    poll_interval: Duration,
    initializing: AtomicBool,
    running: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
    active: AtomicUsize,
    finished_copies: AtomicUsize,
    settled: Mutex<bool>,
    settled_cv: Condvar,
}

impl ExecutionState {
    /// Creates the state of a run that has not started.
    #[must_use]
    pub fn new(stop: StopSignal, poll_interval: Duration) -> Self {
        Self {
            stop,
            poll_interval,
            initializing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            finished_copies: AtomicUsize::new(0),
            settled: Mutex::new(false),
            settled_cv: Condvar::new(),
        }
    }

    /// The run's stop signal.
    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Granularity of stop and pause checks.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Raises the stop flag. Idempotent.
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub(crate) fn set_initializing(&self, value: bool) {
        self.initializing.store(value, Ordering::Release);
    }

    /// Returns true while stage copies are initializing.
    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Release);
    }

    /// Returns true from start until every copy completed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, value: bool) {
        self.paused.store(value, Ordering::Release);
    }

    /// Returns true while a pause is in effect.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Returns true once every copy completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Sleeps in `poll_interval` slices while paused and not stopped.
    pub fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_stopped() {
            thread::sleep(self.poll_interval);
        }
    }

    pub(crate) fn set_active(&self, copies: usize) {
        self.active.store(copies, Ordering::Release);
    }

    /// Copies started and not yet completed.
    #[must_use]
    pub fn active_copies(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Copies that completed.
    #[must_use]
    pub fn finished_copies(&self) -> usize {
        self.finished_copies.load(Ordering::Acquire)
    }

    /// Counts one completed copy and returns the new finished count.
    pub(crate) fn copy_finished(&self) -> usize {
        // Saturates at zero.
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.finished_copies.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks the run finished. Waiters are released by [`Self::settle`].
    pub(crate) fn set_finished(&self) {
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.finished.store(true, Ordering::Release);
    }

    /// Releases every `wait_finished` caller.
    pub(crate) fn settle(&self) {
        let mut settled = self.settled.lock();
        *settled = true;
        self.settled_cv.notify_all();
    }

    /// Blocks until the run settled, or until `timeout` elapsed.
    ///
    /// Returns true if the run settled.
    pub fn wait_finished(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut settled = self.settled.lock();
        while !*settled {
            match deadline {
                Some(deadline) => {
                    if self.settled_cv.wait_until(&mut settled, deadline).timed_out() {
                        return *settled;
                    }
                }
                None => self.settled_cv.wait(&mut settled),
            }
        }
        true
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        if self.is_stopped() {
            RunPhase::Stopped
        } else if self.is_finished() {
            RunPhase::Finished
        } else if self.is_paused() {
            RunPhase::Paused
        } else if self.is_running() {
            RunPhase::Running
        } else if self.is_initializing() {
            RunPhase::Initializing
        } else {
            RunPhase::Preparing
        }
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("phase", &self.phase())
            .field("active", &self.active_copies())
            .field("finished_copies", &self.finished_copies())
            .finish_non_exhaustive()
    }
}
