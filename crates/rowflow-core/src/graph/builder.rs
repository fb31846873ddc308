//! Fluent builder for pipeline graphs.

use super::error::GraphError;
use super::topology::{PipelineGraph, StageNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopKind {
    Main,
    Info,
    Disabled,
}

/// Fluent builder for constructing a validated [`PipelineGraph`].
///
/// Errors are collected and reported by [`GraphBuilder::build`].
///
/// # Example
///
/// ```rust,ignore
/// use rowflow_core::graph::{GraphBuilder, StageNode};
///
/// let graph = GraphBuilder::new()
///     .stage("source", "row_generator")
///     .add(StageNode::new("filter", "passthrough").with_copies(2))
///     .stage("sink", "discard")
///     .hop("source", "filter")
///     .hop("filter", "sink")
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    stages: Vec<StageNode>,
    hops: Vec<(String, String, HopKind)>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-copy stage of the given type.
    #[must_use]
    pub fn stage(self, name: &str, stage_type: &str) -> Self {
        self.add(StageNode::new(name, stage_type))
    }

    /// Adds a fully described stage.
    #[must_use]
    pub fn add(mut self, node: StageNode) -> Self {
        self.stages.push(node);
        self
    }

    /// Connects two stages with a main-stream hop.
    #[must_use]
    pub fn hop(mut self, from: &str, to: &str) -> Self {
        self.hops.push((from.to_string(), to.to_string(), HopKind::Main));
        self
    }

    /// Connects two stages with an information hop.
    #[must_use]
    pub fn info_hop(mut self, from: &str, to: &str) -> Self {
        self.hops.push((from.to_string(), to.to_string(), HopKind::Info));
        self
    }

    /// Adds a disabled hop.
    #[must_use]
    pub fn disabled_hop(mut self, from: &str, to: &str) -> Self {
        self.hops
            .push((from.to_string(), to.to_string(), HopKind::Disabled));
        self
    }

    /// Connects `from` to each of `targets`.
    #[must_use]
    pub fn fan_out(mut self, from: &str, targets: &[&str]) -> Self {
        for target in targets {
            self = self.hop(from, target);
        }
        self
    }

    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns the first `GraphError` raised while adding stages or hops,
    /// or by validation.
    pub fn build(self) -> Result<PipelineGraph, GraphError> {
        let mut graph = PipelineGraph::new();
        for node in self.stages {
            graph.add_stage(node)?;
        }
        for (from, to, kind) in &self.hops {
            match kind {
                HopKind::Main => graph.add_hop(from, to)?,
                HopKind::Info => graph.add_info_hop(from, to)?,
                HopKind::Disabled => graph.add_disabled_hop(from, to)?,
            };
        }
        graph.validate()?;
        Ok(graph)
    }
}
