//! Pipeline graph data structures.
//!
//! Defines `StageNode`, `HopEdge`, and `PipelineGraph` with validation,
//! cycle detection, and a deterministic topological order.

use std::collections::VecDeque;
use std::fmt;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use super::error::GraphError;
use crate::partition::StagePartitioning;
use crate::row::RowMeta;

/// Unique identifier for a stage in the graph.
///
/// Ids are dense and follow insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    /// Position of the stage in insertion order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

/// Unique identifier for a hop in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HopId(pub u32);

impl fmt::Display for HopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HopId({})", self.0)
    }
}

/// Where a stage sends rows it rejects, and when too many rejections fail
/// the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHandling {
    /// Stage receiving rejected rows. Must be a direct successor.
    pub target: String,
    /// Fail once more than this many rows were rejected (0 = unlimited).
    pub max_errors: u64,
    /// Fail once the rejected share of read rows exceeds this percentage
    /// (0 = unlimited).
    pub max_percent_errors: u8,
    /// Rows to read before the percentage limit applies (0 = immediately).
    pub min_rows_for_percent: u64,
}

impl ErrorHandling {
    /// Error rows go to `target`, without rejection limits.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            max_errors: 0,
            max_percent_errors: 0,
            min_rows_for_percent: 0,
        }
    }

    /// Sets the absolute rejection limit.
    #[must_use]
    pub fn with_max_errors(mut self, max_errors: u64) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Sets the percentage rejection limit.
    #[must_use]
    pub fn with_max_percent(mut self, percent: u8, min_rows: u64) -> Self {
        self.max_percent_errors = percent;
        self.min_rows_for_percent = min_rows;
        self
    }
}

/// Static description of one stage.
///
/// Produced by whoever defines the pipeline; read-only to the engine.
#[derive(Clone)]
pub struct StageNode {
    /// Unique stage identifier (assigned when added to a graph).
    pub id: StageId,
    /// Unique human-readable name.
    pub name: String,
    /// Registry tag used to instantiate the stage.
    pub stage_type: String,
    /// Requested number of parallel copies (at least 1).
    pub copies: usize,
    /// Optional partitioning; a partitioned stage runs one copy per partition.
    pub partitioning: Option<StagePartitioning>,
    /// Optional error-row routing.
    pub error_handling: Option<ErrorHandling>,
    /// Round-robin rows over outputs (`true`) or copy every row to every
    /// output (`false`).
    pub distribute: bool,
    /// Layout of the rows this stage emits, when known.
    pub output_fields: Option<RowMeta>,
    /// Stage-specific settings handed to the stage factory.
    pub properties: FxHashMap<String, String>,
    /// Incoming hops.
    pub inputs: SmallVec<[HopId; 4]>,
    /// Outgoing hops.
    pub outputs: SmallVec<[HopId; 4]>,
}

impl StageNode {
    /// Creates a single-copy, unpartitioned, distributing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            id: StageId(0),
            name: name.into(),
            stage_type: stage_type.into(),
            copies: 1,
            partitioning: None,
            error_handling: None,
            distribute: true,
            output_fields: None,
            properties: FxHashMap::default(),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
        }
    }

    /// Sets the requested copy count.
    #[must_use]
    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    /// Sets the partitioning descriptor.
    #[must_use]
    pub fn with_partitioning(mut self, partitioning: StagePartitioning) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    /// Sets the error-row routing.
    #[must_use]
    pub fn with_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.error_handling = Some(handling);
        self
    }

    /// Copies every row to every output instead of distributing.
    #[must_use]
    pub fn copy_rows(mut self) -> Self {
        self.distribute = false;
        self
    }

    /// Declares the emitted row layout.
    #[must_use]
    pub fn with_output_fields(mut self, fields: RowMeta) -> Self {
        self.output_fields = Some(fields);
        self
    }

    /// Adds a stage-specific setting.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns a stage-specific setting.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns true if the stage has an active partitioning descriptor.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.partitioning
            .as_ref()
            .is_some_and(StagePartitioning::is_partitioned)
    }

    /// Copies the stage runs with when no override applies.
    ///
    /// A partitioned stage runs one copy per partition.
    #[must_use]
    pub fn effective_copies(&self) -> usize {
        match &self.partitioning {
            Some(p) if p.is_partitioned() => p.partition_count(),
            _ => self.copies,
        }
    }
}

impl fmt::Debug for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stage_type", &self.stage_type)
            .field("copies", &self.copies)
            .field("partitioning", &self.partitioning)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// A directed connection between two stages.
#[derive(Debug, Clone)]
pub struct HopEdge {
    /// Unique hop identifier.
    pub id: HopId,
    /// Origin stage.
    pub from: StageId,
    /// Destination stage.
    pub to: StageId,
    /// Disabled hops are ignored for allocation and ordering.
    pub enabled: bool,
    /// The hop carries side-lookup data (an information input) rather
    /// than the main row stream.
    pub info: bool,
}

/// The complete stage graph.
///
/// Build it with `add_stage`/`add_hop` or [`super::GraphBuilder`], then call
/// [`PipelineGraph::validate`] before handing it to the engine.
pub struct PipelineGraph {
    stages: Vec<StageNode>,
    hops: Vec<HopEdge>,
    name_index: FxHashMap<String, StageId>,
    /// Topological order over enabled hops (ancestors first).
    execution_order: Vec<StageId>,
    validated: bool,
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("stage_count", &self.stages.len())
            .field("hop_count", &self.hops.len())
            .field("execution_order", &self.execution_order)
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            hops: Vec::new(),
            name_index: FxHashMap::default(),
            execution_order: Vec::new(),
            validated: false,
        }
    }

    /// Adds a stage. The node's `id`, `inputs` and `outputs` are reset.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateStage` if the name is taken, or
    /// `GraphError::InvalidCopies` if zero copies are requested.
    pub fn add_stage(&mut self, mut node: StageNode) -> Result<StageId, GraphError> {
        if self.name_index.contains_key(&node.name) {
            return Err(GraphError::DuplicateStage(node.name));
        }
        if node.copies == 0 {
            return Err(GraphError::InvalidCopies(node.name));
        }

        // Stage counts are far below u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        let id = StageId(self.stages.len() as u32);
        node.id = id;
        node.inputs.clear();
        node.outputs.clear();
        self.name_index.insert(node.name.clone(), id);
        self.stages.push(node);
        self.validated = false;
        Ok(id)
    }

    /// Adds an enabled main-stream hop between two named stages.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::StageNotFound` for unknown names,
    /// `GraphError::CycleDetected` for a self-loop, or
    /// `GraphError::DuplicateHop` if the hop already exists.
    pub fn add_hop(&mut self, from: &str, to: &str) -> Result<HopId, GraphError> {
        self.insert_hop(from, to, true, false)
    }

    /// Adds an enabled hop carrying information (side-lookup) rows.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineGraph::add_hop`].
    pub fn add_info_hop(&mut self, from: &str, to: &str) -> Result<HopId, GraphError> {
        self.insert_hop(from, to, true, true)
    }

    /// Adds a disabled hop. It is kept in the graph but never allocated.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineGraph::add_hop`].
    pub fn add_disabled_hop(&mut self, from: &str, to: &str) -> Result<HopId, GraphError> {
        self.insert_hop(from, to, false, false)
    }

    /// Enables or disables an existing hop.
    ///
    /// Returns `false` if the hop does not exist.
    pub fn set_hop_enabled(&mut self, id: HopId, enabled: bool) -> bool {
        match self.hops.get_mut(id.0 as usize) {
            Some(hop) => {
                hop.enabled = enabled;
                self.validated = false;
                true
            }
            None => false,
        }
    }

    fn insert_hop(
        &mut self,
        from: &str,
        to: &str,
        enabled: bool,
        info: bool,
    ) -> Result<HopId, GraphError> {
        let from_id = self
            .stage_id(from)
            .ok_or_else(|| GraphError::StageNotFound(from.to_string()))?;
        let to_id = self
            .stage_id(to)
            .ok_or_else(|| GraphError::StageNotFound(to.to_string()))?;
        if from_id == to_id {
            return Err(GraphError::CycleDetected(from.to_string()));
        }
        if self.hops.iter().any(|h| h.from == from_id && h.to == to_id) {
            return Err(GraphError::DuplicateHop {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = HopId(self.hops.len() as u32);
        self.hops.push(HopEdge {
            id,
            from: from_id,
            to: to_id,
            enabled,
            info,
        });
        self.stages[from_id.index()].outputs.push(id);
        self.stages[to_id.index()].inputs.push(id);
        self.validated = false;
        Ok(id)
    }

    /// Validates the graph and computes the execution order.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::EmptyGraph` if there are no stages,
    /// `GraphError::CycleDetected` if the enabled hops contain a cycle,
    /// `GraphError::InvalidErrorTarget` if an error target is not a direct
    /// enabled successor, or `GraphError::InvalidPartitioning` for an
    /// unusable partitioning descriptor.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        self.check_partitioning()?;
        self.check_error_targets()?;
        self.execution_order = self.topological_order()?;
        self.validated = true;
        Ok(())
    }

    fn check_partitioning(&self) -> Result<(), GraphError> {
        for stage in &self.stages {
            let Some(partitioning) = stage.partitioning.as_ref() else {
                continue;
            };
            if !partitioning.is_partitioned() {
                continue;
            }
            if partitioning.partition_count() == 0 {
                return Err(GraphError::InvalidPartitioning {
                    stage: stage.name.clone(),
                    reason: format!("schema {} has no partitions", partitioning.schema.name),
                });
            }
            if partitioning.method.needs_key() && partitioning.key_column.is_none() {
                return Err(GraphError::InvalidPartitioning {
                    stage: stage.name.clone(),
                    reason: format!("{} partitioning needs a key column", partitioning.method),
                });
            }
        }
        Ok(())
    }

    fn check_error_targets(&self) -> Result<(), GraphError> {
        for stage in &self.stages {
            let Some(handling) = stage.error_handling.as_ref() else {
                continue;
            };
            let valid = self.stage_id(&handling.target).is_some_and(|target| {
                self.enabled_hops()
                    .any(|h| h.from == stage.id && h.to == target && !h.info)
            });
            if !valid {
                return Err(GraphError::InvalidErrorTarget {
                    stage: stage.name.clone(),
                    target: handling.target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over enabled hops. Ready stages are taken in id
    /// order, so the result is deterministic.
    fn topological_order(&self) -> Result<Vec<StageId>, GraphError> {
        let mut in_degree = vec![0usize; self.stages.len()];
        for hop in self.enabled_hops() {
            in_degree[hop.to.index()] += 1;
        }

        let mut ready: VecDeque<StageId> = self
            .stages
            .iter()
            .filter(|s| in_degree[s.id.index()] == 0)
            .map(|s| s.id)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            let mut released: SmallVec<[StageId; 8]> = SmallVec::new();
            for next in self.next_stages(id) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    released.push(next);
                }
            }
            released.sort_unstable();
            ready.extend(released);
        }

        if order.len() != self.stages.len() {
            let culprit = self
                .stages
                .iter()
                .find(|s| in_degree[s.id.index()] > 0)
                .map(|s| s.name.clone())
                .unwrap_or_default();
            return Err(GraphError::CycleDetected(culprit));
        }
        Ok(order)
    }

    // ---- Accessors ----

    /// Returns true once `validate` succeeded and nothing changed since.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of hops, enabled or not.
    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// All stages in insertion order.
    #[must_use]
    pub fn stages(&self) -> &[StageNode] {
        &self.stages
    }

    /// All hops in insertion order.
    #[must_use]
    pub fn hops(&self) -> &[HopEdge] {
        &self.hops
    }

    /// Enabled hops in insertion order.
    pub fn enabled_hops(&self) -> impl Iterator<Item = &HopEdge> {
        self.hops.iter().filter(|h| h.enabled)
    }

    /// Stage by id.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(id.index())
    }

    /// Hop by id.
    #[must_use]
    pub fn hop(&self, id: HopId) -> Option<&HopEdge> {
        self.hops.get(id.0 as usize)
    }

    /// Stage id for a name.
    #[must_use]
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.name_index.get(name).copied()
    }

    /// Stage by name.
    #[must_use]
    pub fn stage_by_name(&self, name: &str) -> Option<&StageNode> {
        self.stage_id(name).and_then(|id| self.stage(id))
    }

    /// Destinations of the enabled hops leaving `id`, in hop order.
    pub fn next_stages(&self, id: StageId) -> impl Iterator<Item = StageId> + '_ {
        self.enabled_hops().filter(move |h| h.from == id).map(|h| h.to)
    }

    /// Origins of the enabled hops entering `id`, in hop order.
    pub fn prev_stages(&self, id: StageId) -> impl Iterator<Item = StageId> + '_ {
        self.enabled_hops().filter(move |h| h.to == id).map(|h| h.from)
    }

    /// Returns true if no enabled main-stream hop enters `id`.
    #[must_use]
    pub fn is_source(&self, id: StageId) -> bool {
        !self.enabled_hops().any(|h| h.to == id && !h.info)
    }

    /// Returns true if no enabled hop leaves `id`.
    #[must_use]
    pub fn is_sink(&self, id: StageId) -> bool {
        !self.enabled_hops().any(|h| h.from == id)
    }

    /// Topological order over enabled hops; empty until validated.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        &self.execution_order
    }
}
