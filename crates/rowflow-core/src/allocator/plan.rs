//! Allocation result: channels and per-copy wiring.

use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use super::DispatchClass;
use crate::channel::ChannelRef;
use crate::graph::{HopId, StageId};

/// Identity of one stage copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyKey {
    /// Stage id.
    pub stage: StageId,
    /// Copy index.
    pub copy: usize,
}

impl CopyKey {
    /// Creates a copy key.
    #[must_use]
    pub fn new(stage: StageId, copy: usize) -> Self {
        Self { stage, copy }
    }
}

impl fmt::Display for CopyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage.0, self.copy)
    }
}

/// Consumer end of a channel as seen by one stage copy.
#[derive(Debug, Clone)]
pub struct InputPort {
    /// Hop the channel was allocated for.
    pub hop: HopId,
    /// Producing stage.
    pub from: StageId,
    /// Producing copy index.
    pub from_copy: usize,
    /// Whether the hop carries information rows.
    pub info: bool,
    /// The channel.
    pub channel: ChannelRef,
}

/// Producer end of a channel and the consumer copy it reaches.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    /// Consuming copy index.
    pub copy: usize,
    /// The channel.
    pub channel: ChannelRef,
}

/// All channels one stage copy writes for one hop.
#[derive(Debug, Clone)]
pub struct OutputGroup {
    /// Hop the channels were allocated for.
    pub hop: HopId,
    /// Consuming stage.
    pub to: StageId,
    /// Topology class of the hop.
    pub class: DispatchClass,
    /// Rows must go through the consumer's partitioner.
    pub repartition: bool,
    /// The hop is the producer's error-row output.
    pub error: bool,
    /// The hop carries information rows.
    pub info: bool,
    /// Targets ordered by consuming copy index.
    pub targets: SmallVec<[OutputTarget; 4]>,
}

/// Channel ends owned by one stage copy.
#[derive(Debug, Clone, Default)]
pub struct CopyWiring {
    /// Inputs in hop order, then producer copy order.
    pub inputs: Vec<InputPort>,
    /// Outputs in hop order.
    pub outputs: Vec<OutputGroup>,
}

/// Result of channel allocation.
pub struct ChannelPlan {
    pub(super) channels: Vec<ChannelRef>,
    pub(super) classes: Vec<(HopId, DispatchClass)>,
    pub(super) wiring: FxHashMap<CopyKey, CopyWiring>,
}

impl ChannelPlan {
    /// Total number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// All channels in allocation order.
    #[must_use]
    pub fn channels(&self) -> &[ChannelRef] {
        &self.channels
    }

    /// Dispatch class chosen for an enabled hop.
    #[must_use]
    pub fn class_of(&self, hop: HopId) -> Option<DispatchClass> {
        self.classes
            .iter()
            .find(|(id, _)| *id == hop)
            .map(|(_, class)| *class)
    }

    /// Wiring of one stage copy.
    #[must_use]
    pub fn wiring(&self, key: CopyKey) -> Option<&CopyWiring> {
        self.wiring.get(&key)
    }

    /// Removes and returns the wiring of one stage copy.
    pub fn take_wiring(&mut self, key: CopyKey) -> CopyWiring {
        self.wiring.remove(&key).unwrap_or_default()
    }
}

impl fmt::Debug for ChannelPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPlan")
            .field("channel_count", &self.channels.len())
            .field("classes", &self.classes)
            .field("copies", &self.wiring.len())
            .finish_non_exhaustive()
    }
}
