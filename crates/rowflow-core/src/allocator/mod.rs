//! # Channel Allocation
//!
//! Turns the enabled hops of a graph into channels between stage copies.
//!
//! For a hop `A -> B` the dispatch class follows from the copy counts and
//! whether rows must be re-routed through `B`'s partitioner:
//!
//! | copies(A) | copies(B) | repartition | class | channels | wiring |
//! |-----------|-----------|-------------|-------|----------|--------|
//! | 1 | 1 | any   | 1:1 | 1   | `A0 -> B0` |
//! | 1 | N | any   | 1:N | N   | `A0 -> Bc` |
//! | N | 1 | any   | N:1 | N   | `Ac -> B0` |
//! | N | N | no    | N:N | N   | `Ai -> Bi` |
//! | N | M | any   | N:M | N×M | `As -> Bt` |
//!
//! Allocation walks hops in insertion order and copies in index order, so
//! the same graph always yields the same channel set. Every bounded channel
//! gets the same capacity.

mod plan;

pub use plan::{ChannelPlan, CopyKey, CopyWiring, InputPort, OutputGroup, OutputTarget};

use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::channel::{new_channel, ChannelConfig, ChannelId, ChannelKind, ChannelRef, StopSignal};
use crate::graph::{HopEdge, PipelineGraph};
use crate::partition::needs_repartitioning;

/// Topology pattern of the channels allocated for one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchClass {
    /// One copy to one copy.
    OneToOne,
    /// One copy to N copies.
    OneToMany,
    /// N copies to one copy.
    ManyToOne,
    /// N copies to N copies, copy `i` only to copy `i`.
    PairWise,
    /// Full cross product.
    CrossProduct,
}

impl DispatchClass {
    /// Classifies a hop.
    #[must_use]
    pub fn classify(from_copies: usize, to_copies: usize, repartition: bool) -> Self {
        match (from_copies, to_copies) {
            (1, 1) => Self::OneToOne,
            (1, _) => Self::OneToMany,
            (_, 1) => Self::ManyToOne,
            (n, m) if n == m && !repartition => Self::PairWise,
            _ => Self::CrossProduct,
        }
    }

    /// Number of channels the class allocates.
    #[must_use]
    pub fn channel_count(self, from_copies: usize, to_copies: usize) -> usize {
        match self {
            Self::OneToOne => 1,
            Self::OneToMany => to_copies,
            Self::ManyToOne | Self::PairWise => from_copies,
            Self::CrossProduct => from_copies * to_copies,
        }
    }
}

impl fmt::Display for DispatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OneToOne => "1:1",
            Self::OneToMany => "1:N",
            Self::ManyToOne => "N:1",
            Self::PairWise => "N:N",
            Self::CrossProduct => "N:M",
        };
        f.write_str(name)
    }
}

/// Materializes channels for a graph.
#[derive(Debug, Clone)]
pub struct ChannelAllocator {
    kind: ChannelKind,
    config: ChannelConfig,
    stop: StopSignal,
}

impl ChannelAllocator {
    /// Creates an allocator producing channels of `kind`.
    #[must_use]
    pub fn new(kind: ChannelKind, config: ChannelConfig, stop: StopSignal) -> Self {
        Self { kind, config, stop }
    }

    /// Allocates channels for every enabled hop.
    ///
    /// `copies[i]` is the effective copy count of the stage with id `i`.
    /// Stages missing from `copies` run one copy.
    #[must_use]
    pub fn allocate(&self, graph: &PipelineGraph, copies: &[usize]) -> ChannelPlan {
        let copies_of = |index: usize| copies.get(index).copied().unwrap_or(1).max(1);

        let mut wiring: FxHashMap<CopyKey, CopyWiring> = FxHashMap::default();
        for stage in graph.stages() {
            for copy in 0..copies_of(stage.id.index()) {
                wiring.insert(CopyKey::new(stage.id, copy), CopyWiring::default());
            }
        }

        let mut channels = Vec::new();
        let mut classes = Vec::new();

        for hop in graph.enabled_hops() {
            let (Some(from), Some(to)) = (graph.stage(hop.from), graph.stage(hop.to)) else {
                continue;
            };
            let from_copies = copies_of(hop.from.index());
            let to_copies = copies_of(hop.to.index());
            let repartition =
                needs_repartitioning(from.partitioning.as_ref(), to.partitioning.as_ref());
            let class = DispatchClass::classify(from_copies, to_copies, repartition);
            let error = from
                .error_handling
                .as_ref()
                .is_some_and(|h| h.target == to.name);
            classes.push((hop.id, class));

            let pairs = Self::pairs(class, from_copies, to_copies);
            debug!(
                from = %from.name,
                to = %to.name,
                class = %class,
                channels = pairs.len(),
                "allocating hop"
            );

            let mut groups: FxHashMap<usize, SmallVec<[OutputTarget; 4]>> = FxHashMap::default();
            for (from_copy, to_copy) in pairs {
                let id = ChannelId::new(&from.name, from_copy, &to.name, to_copy);
                let channel = new_channel(self.kind, id, self.config, self.stop.clone());
                channels.push(ChannelRef::clone(&channel));

                groups.entry(from_copy).or_default().push(OutputTarget {
                    copy: to_copy,
                    channel: ChannelRef::clone(&channel),
                });
                if let Some(w) = wiring.get_mut(&CopyKey::new(hop.to, to_copy)) {
                    w.inputs.push(InputPort {
                        hop: hop.id,
                        from: hop.from,
                        from_copy,
                        info: hop.info,
                        channel,
                    });
                }
            }

            let mut producers: Vec<_> = groups.into_iter().collect();
            producers.sort_by_key(|(copy, _)| *copy);
            for (from_copy, targets) in producers {
                if let Some(w) = wiring.get_mut(&CopyKey::new(hop.from, from_copy)) {
                    w.outputs.push(Self::group(hop, class, repartition, error, targets));
                }
            }
        }

        ChannelPlan {
            channels,
            classes,
            wiring,
        }
    }

    fn group(
        hop: &HopEdge,
        class: DispatchClass,
        repartition: bool,
        error: bool,
        targets: SmallVec<[OutputTarget; 4]>,
    ) -> OutputGroup {
        OutputGroup {
            hop: hop.id,
            to: hop.to,
            class,
            repartition,
            error,
            info: hop.info,
            targets,
        }
    }

    /// `(producer copy, consumer copy)` pairs for a class, producer-major.
    fn pairs(class: DispatchClass, from_copies: usize, to_copies: usize) -> Vec<(usize, usize)> {
        match class {
            DispatchClass::OneToOne => vec![(0, 0)],
            DispatchClass::OneToMany => (0..to_copies).map(|c| (0, c)).collect(),
            DispatchClass::ManyToOne => (0..from_copies).map(|c| (c, 0)).collect(),
            DispatchClass::PairWise => (0..from_copies).map(|c| (c, c)).collect(),
            DispatchClass::CrossProduct => (0..from_copies)
                .flat_map(|s| (0..to_copies).map(move |t| (s, t)))
                .collect(),
        }
    }
}
