//! # Execution Engine
//!
//! Prepares a [`PipelineGraph`] for execution and drives the resulting
//! [`Pipeline`].
//!
//! ## Phases
//!
//! ```text
//! prepare ──▶ allocate ──▶ create ──▶ init barrier ──▶ start ──▶ finished
//!   │ graph, copies,        runtimes     all copies      │
//!   │ partitions, keys      via registry in parallel     ├─ threaded: thread per copy
//!   ▼                                        │           ├─ serial:   one thread
//! ConfigurationError          InitializationError        └─ cooperative: scheduler
//! ```
//!
//! The init barrier is all-or-nothing: if any copy fails `init`, every copy
//! is disposed and no row ever moves.
//!
//! Completion is tracked in one place. Copies report a snapshot when they
//! end; the tracker counts them, stops the whole run as soon as a copy
//! finished with errors, and settles the run after the last one.

mod completion;
mod config;
mod error;
mod listener;
mod pipeline;
mod producer;
mod state;

#[cfg(test)]
mod tests;

pub use config::{
    ConfigError, EngineConfig, EngineConfigBuilder, ExecutionMode, DEFAULT_HOST,
    DEFAULT_THREAD_NAME_PREFIX,
};
pub use error::{EngineError, InitFailure};
pub use listener::{PipelineListener, RunResult};
pub use pipeline::Pipeline;
pub use producer::RowProducer;
pub use state::{ExecutionState, RunPhase};

pub(crate) use completion::Completion;
pub(crate) use pipeline::PipelineParts;

use std::sync::Arc;
use std::thread;

use fxhash::FxHashMap;
use tracing::{debug, error, info};

use crate::allocator::{ChannelAllocator, CopyKey, OutputGroup};
use crate::channel::StopSignal;
use crate::graph::{HopId, PipelineGraph, StageId, StageNode};
use crate::partition::{needs_repartitioning, PartitionDistribution, PartitionMethod, Partitioner};
use crate::row::RowMeta;
use crate::stage::{
    error_row_fields, ContextParts, OutputRoute, PartitionSlot, Routing, StageContext,
    StageCounters, StageRegistry, StageRuntime, StageStatus,
};

/// Per-run preparation options.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Copy count overrides by stage name. Partitioned stages only accept
    /// their partition count.
    pub copies: FxHashMap<String, usize>,
    /// Placement of partitions on hosts. Stages it covers run the copies
    /// placed on the engine's host.
    pub distribution: Option<Arc<PartitionDistribution>>,
}

impl PrepareOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the copy count of one stage.
    #[must_use]
    pub fn with_copies(mut self, stage: impl Into<String>, copies: usize) -> Self {
        self.copies.insert(stage.into(), copies);
        self
    }

    /// Sets the partition distribution.
    #[must_use]
    pub fn with_distribution(mut self, distribution: Arc<PartitionDistribution>) -> Self {
        self.distribution = Some(distribution);
        self
    }
}

/// Partition layout of one stage.
#[derive(Debug, Default)]
struct StagePlan {
    copies: usize,
    slots: Vec<Option<PartitionSlot>>,
    copy_of_partition: Vec<Option<usize>>,
}

/// Entry point: turns graphs into prepared pipelines.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with the given settings.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepares and initializes a run of `graph`.
    ///
    /// Validates the graph and settings, resolves copy counts and partition
    /// assignments, allocates channels, creates one stage instance per copy
    /// through `registry` and runs every copy's `init` in parallel.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration`, `EngineError::Graph` or
    /// `EngineError::Config` when the run cannot be set up, and
    /// `EngineError::Initialization` when any copy failed to initialize.
    pub fn prepare(
        &self,
        mut graph: PipelineGraph,
        registry: &StageRegistry,
        options: &PrepareOptions,
    ) -> Result<Pipeline, EngineError> {
        self.config.validate()?;
        if !graph.is_validated() {
            graph.validate()?;
        }
        check_stage_types(&graph, registry, options)?;

        let plans = self.plan_stages(&graph, options)?;
        let partitioners = resolve_partitioners(&graph)?;
        let copies: Vec<usize> = plans.iter().map(|p| p.copies).collect();

        let stop = StopSignal::new();
        let state = Arc::new(ExecutionState::new(stop.clone(), self.config.poll_interval()));
        let mode = self.config.execution_mode;
        let mut plan = ChannelAllocator::new(mode.channel_kind(), self.config.channel_config(), stop)
            .allocate(&graph, &copies);

        let mut runtimes = Vec::with_capacity(copies.iter().sum());
        for node in graph.stages() {
            let shared = Arc::new(node.clone());
            let stage_plan = &plans[node.id.index()];
            let input_fields = input_fields(&graph, node);
            for copy in 0..stage_plan.copies {
                let key = CopyKey::new(node.id, copy);
                let wiring = plan.take_wiring(key);
                let inputs = wiring
                    .inputs
                    .into_iter()
                    .map(|port| (stage_name(&graph, port.from), port.info, port.channel))
                    .collect();
                let outputs = wiring
                    .outputs
                    .into_iter()
                    .map(|group| output_route(&graph, &plans, &partitioners, group))
                    .collect();

                let stage = registry.create(node, copy).map_err(|e| {
                    EngineError::Configuration(format!(
                        "cannot create stage {}.{copy}: {e}",
                        node.name
                    ))
                })?;
                let counters = Arc::new(StageCounters::new());
                let ctx = StageContext::new(ContextParts {
                    node: Arc::clone(&shared),
                    copy,
                    copies: stage_plan.copies,
                    partition: stage_plan.slots.get(copy).cloned().flatten(),
                    input_fields: input_fields.clone(),
                    inputs,
                    outputs,
                    state: Arc::clone(&state),
                    counters: Arc::clone(&counters),
                    blocking: mode.blocking_io(),
                });
                runtimes.push(StageRuntime::new(key, stage, ctx, counters));
            }
        }

        if mode == ExecutionMode::Cooperative {
            let unsupported: Vec<&str> = runtimes
                .iter()
                .filter(|r| !r.supports_cooperative())
                .map(StageRuntime::name)
                .collect();
            if !unsupported.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "stages cannot run cooperatively: {}",
                    dedup_names(&unsupported)
                )));
            }
        }

        info!(
            stages = graph.stage_count(),
            copies = runtimes.len(),
            channels = plan.channel_count(),
            mode = %mode,
            "pipeline prepared"
        );

        state.set_initializing(true);
        let init = self.initialize(&mut runtimes);
        state.set_initializing(false);
        let failed = match init {
            Ok(failed) => failed,
            Err(e) => {
                abort(&mut runtimes, &[], &state);
                return Err(e);
            }
        };

        if !failed.is_empty() {
            let failed_keys: Vec<CopyKey> = failed.iter().map(|(key, _)| *key).collect();
            abort(&mut runtimes, &failed_keys, &state);
            let failures: Vec<InitFailure> = failed.into_iter().map(|(_, f)| f).collect();
            error!(failed = failures.len(), "initialization failed, no stage copy will run");
            return Err(EngineError::Initialization { failures });
        }

        let channels = plan.channels().to_vec();
        Ok(Pipeline::new(
            Arc::new(graph),
            self.config.clone(),
            state,
            runtimes,
            channels,
        ))
    }

    /// Resolves copy counts and partition slots of every stage.
    fn plan_stages(
        &self,
        graph: &PipelineGraph,
        options: &PrepareOptions,
    ) -> Result<Vec<StagePlan>, EngineError> {
        let host = self.config.host.as_str();
        let mut plans: Vec<StagePlan> = (0..graph.stage_count()).map(|_| StagePlan::default()).collect();

        for node in graph.stages() {
            let requested = options.copies.get(&node.name).copied();
            let distribution = options
                .distribution
                .as_deref()
                .filter(|d| node.is_partitioned() && d.covers(&node.name));

            let plan = match &node.partitioning {
                Some(partitioning) if partitioning.is_partitioned() => {
                    let count = partitioning.partition_count();
                    let copies = distribution.map_or(count, |d| d.copies_on(host, &node.name));
                    if requested.is_some_and(|n| n != copies) {
                        return Err(EngineError::Configuration(format!(
                            "stage {} is partitioned into {copies} copies and cannot run {} copies",
                            node.name,
                            requested.unwrap_or_default()
                        )));
                    }

                    let mut slots = Vec::with_capacity(copies);
                    let mut copy_of_partition = vec![None; count];
                    for copy in 0..copies {
                        let nr = match distribution {
                            Some(d) => d.partition_for(host, &node.name, copy).ok_or_else(|| {
                                EngineError::Configuration(format!(
                                    "no partition placed for {}.{copy} on host {host}",
                                    node.name
                                ))
                            })?,
                            None => copy,
                        };
                        let Some(served) = copy_of_partition.get_mut(nr) else {
                            return Err(EngineError::Configuration(format!(
                                "partition {nr} of stage {} is outside its schema of {count}",
                                node.name
                            )));
                        };
                        if served.is_some() {
                            return Err(EngineError::Configuration(format!(
                                "partition {nr} of stage {} is served twice",
                                node.name
                            )));
                        }
                        *served = Some(copy);
                        slots.push(Some(PartitionSlot {
                            nr,
                            id: partitioning.schema.partition_ids[nr].clone(),
                        }));
                    }
                    StagePlan {
                        copies,
                        slots,
                        copy_of_partition,
                    }
                }
                _ => StagePlan {
                    copies: requested.unwrap_or(node.copies),
                    slots: Vec::new(),
                    copy_of_partition: Vec::new(),
                },
            };

            if plan.copies == 0 {
                return Err(EngineError::Configuration(format!(
                    "stage {} has no copies on host {host}",
                    node.name
                )));
            }
            debug!(stage = %node.name, copies = plan.copies, "copies resolved");
            plans[node.id.index()] = plan;
        }
        Ok(plans)
    }

    /// Runs every copy's `init` on its own thread and joins them all.
    ///
    /// Returns the copies that failed.
    fn initialize(
        &self,
        runtimes: &mut [StageRuntime],
    ) -> Result<Vec<(CopyKey, InitFailure)>, EngineError> {
        let prefix = self.config.thread_name_prefix.as_str();
        thread::scope(|scope| {
            let mut pending = Vec::with_capacity(runtimes.len());
            for runtime in runtimes.iter_mut() {
                let key = runtime.key();
                let stage = runtime.name().to_string();
                let name = format!("{prefix}-init-{stage}.{}", key.copy);
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || runtime.init())
                    .map_err(|source| EngineError::Spawn { name, source })?;
                pending.push((key, stage, handle));
            }

            let mut failed = Vec::new();
            for (key, stage, handle) in pending {
                let message = match handle.join() {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "init panicked".to_string(),
                };
                failed.push((
                    key,
                    InitFailure {
                        stage,
                        copy: key.copy,
                        message,
                    },
                ));
            }
            Ok(failed)
        })
    }
}

/// Tears down every copy after a failed init barrier. Copies in `failed`
/// end as `Stopped`, the others as `Halted`.
fn abort(runtimes: &mut [StageRuntime], failed: &[CopyKey], state: &ExecutionState) {
    state.request_stop();
    for runtime in runtimes {
        let status = if failed.contains(&runtime.key()) {
            StageStatus::Stopped
        } else {
            StageStatus::Halted
        };
        runtime.halt(status);
    }
}

fn check_stage_types(
    graph: &PipelineGraph,
    registry: &StageRegistry,
    options: &PrepareOptions,
) -> Result<(), EngineError> {
    for node in graph.stages() {
        if !registry.contains(&node.stage_type) {
            return Err(EngineError::Configuration(format!(
                "stage {} has unknown type {}",
                node.name, node.stage_type
            )));
        }
    }
    for name in options.copies.keys() {
        if graph.stage_id(name).is_none() {
            return Err(EngineError::Configuration(format!(
                "copy override for unknown stage {name}"
            )));
        }
    }
    Ok(())
}

/// Builds the partitioner of every enabled hop that re-routes rows into a
/// keyed partitioned stage. The key column is looked up in the producer's
/// declared output fields.
fn resolve_partitioners(
    graph: &PipelineGraph,
) -> Result<FxHashMap<HopId, Arc<dyn Partitioner>>, EngineError> {
    let mut partitioners = FxHashMap::default();
    for hop in graph.enabled_hops() {
        let (Some(from), Some(to)) = (graph.stage(hop.from), graph.stage(hop.to)) else {
            continue;
        };
        let Some(partitioning) = to.partitioning.as_ref() else {
            continue;
        };
        if !partitioning.method.needs_key()
            || !needs_repartitioning(from.partitioning.as_ref(), Some(partitioning))
        {
            continue;
        }

        let column = partitioning.key_column.as_deref().ok_or_else(|| {
            EngineError::Configuration(format!("stage {} is partitioned without a key column", to.name))
        })?;
        let fields = from.output_fields.as_ref().ok_or_else(|| {
            EngineError::Configuration(format!(
                "stage {} does not declare its output fields, needed to partition {} on {column}",
                from.name, to.name
            ))
        })?;
        let index = fields.index_of(column).ok_or_else(|| {
            EngineError::Configuration(format!(
                "partition key {column} of stage {} is not an output field of {}",
                to.name, from.name
            ))
        })?;
        let value_type = fields.fields()[index].value_type;
        if !partitioning.method.accepts_key_type(value_type) {
            return Err(EngineError::Configuration(format!(
                "partition key {column} of stage {} has type {value_type}, which {} partitioning cannot route",
                to.name, partitioning.method
            )));
        }

        let partitioner = partitioning
            .partitioner(index)
            .map_err(|e| EngineError::Configuration(format!("stage {}: {e}", to.name)))?;
        if let Some(partitioner) = partitioner {
            partitioners.insert(hop.id, partitioner);
        }
    }
    Ok(partitioners)
}

/// Routing of one output group.
fn output_route(
    graph: &PipelineGraph,
    plans: &[StagePlan],
    partitioners: &FxHashMap<HopId, Arc<dyn Partitioner>>,
    group: OutputGroup,
) -> OutputRoute {
    let target = stage_name(graph, group.to);
    let method = graph
        .stage(group.to)
        .and_then(|n| n.partitioning.as_ref())
        .map_or(PartitionMethod::None, |p| p.method);

    let routing = if group.error || !group.repartition {
        Routing::Plain
    } else {
        match (method, partitioners.get(&group.hop)) {
            (PartitionMethod::Mirror, _) => Routing::Mirror,
            (PartitionMethod::Hash | PartitionMethod::Modulo, Some(partitioner)) => {
                Routing::Partitioned {
                    partitioner: Arc::clone(partitioner),
                    copy_of_partition: plans
                        .get(group.to.index())
                        .map(|p| p.copy_of_partition.clone())
                        .unwrap_or_default(),
                }
            }
            _ => Routing::Plain,
        }
    };
    OutputRoute::new(target, group, routing)
}

/// Layout of the rows a stage reads: the declared output of its first main
/// upstream, extended with the error fields when that hop carries error rows.
fn input_fields(graph: &PipelineGraph, node: &StageNode) -> Option<RowMeta> {
    let hop = graph.enabled_hops().find(|h| h.to == node.id && !h.info)?;
    let from = graph.stage(hop.from)?;
    let fields = from.output_fields.as_ref()?;
    let carries_errors = from
        .error_handling
        .as_ref()
        .is_some_and(|h| h.target == node.name);
    Some(if carries_errors {
        error_row_fields(fields)
    } else {
        fields.clone()
    })
}

fn stage_name(graph: &PipelineGraph, id: StageId) -> String {
    graph
        .stage(id)
        .map_or_else(|| format!("#{}", id.0), |n| n.name.clone())
}

fn dedup_names(names: &[&str]) -> String {
    let mut unique: Vec<&str> = names.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique.join(", ")
}
