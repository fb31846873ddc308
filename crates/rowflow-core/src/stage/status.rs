//! Stage copy status.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle status of one stage copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StageStatus {
    /// Created, not yet initialized or waiting to start.
    Idle = 0,
    /// The init hook is running.
    Initializing = 1,
    /// The run loop is active.
    Running = 2,
    /// Running, but row I/O is stalled by a pause request.
    Paused = 3,
    /// Completed on its own.
    Finished = 4,
    /// Ended by a stop request or a failure.
    Stopped = 5,
    /// Initialized, then torn down because another stage failed to
    /// initialize.
    Halted = 6,
}

impl StageStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Finished,
            5 => Self::Stopped,
            6 => Self::Halted,
            _ => Self::Idle,
        }
    }

    /// Returns true for statuses a copy never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Halted)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
            Self::Stopped => "Stopped",
            Self::Halted => "Halted",
        };
        f.write_str(name)
    }
}

/// Status cell shared between a run thread and observers.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    /// Creates a cell holding `status`.
    #[must_use]
    pub fn new(status: StageStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Current status.
    #[must_use]
    pub fn get(&self) -> StageStatus {
        StageStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replaces the status.
    pub fn set(&self, status: StageStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Moves from `from` to `to` if the current status is `from`.
    pub fn transition(&self, from: StageStatus, to: StageStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new(StageStatus::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_statuses() {
        let cell = AtomicStatus::default();
        for status in [
            StageStatus::Idle,
            StageStatus::Initializing,
            StageStatus::Running,
            StageStatus::Paused,
            StageStatus::Finished,
            StageStatus::Stopped,
            StageStatus::Halted,
        ] {
            cell.set(status);
            assert_eq!(cell.get(), status);
        }
    }

    #[test]
    fn test_transition() {
        let cell = AtomicStatus::new(StageStatus::Running);
        assert!(cell.transition(StageStatus::Running, StageStatus::Paused));
        assert!(!cell.transition(StageStatus::Running, StageStatus::Finished));
        assert_eq!(cell.get(), StageStatus::Paused);
    }

    #[test]
    fn test_terminal() {
        assert!(StageStatus::Halted.is_terminal());
        assert!(!StageStatus::Paused.is_terminal());
        assert_eq!(StageStatus::Stopped.to_string(), "Stopped");
    }
}
