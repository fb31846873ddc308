//! # `rowflow` Core
//!
//! Execution engine for row pipelines: a directed graph of stages whose
//! copies exchange rows over bounded channels.
//!
//! This crate provides:
//! - **Graph**: stage nodes, hops, validation and dependency ordering
//! - **Channels**: blocking, single-slot and unbounded row channels
//! - **Allocation**: channel wiring between stage copies per hop
//! - **Partitioning**: hash and modulo routing of rows to stage copies
//! - **Stages**: the `Stage` trait, row I/O context, registry and built-ins
//! - **Engine**: prepare, all-or-nothing init, threaded and serial runs
//! - **Cooperative**: single-threaded scheduler over the same stages
//!
//! ## Example
//!
//! ```rust,no_run
//! use rowflow_core::engine::{Engine, EngineConfig, PrepareOptions};
//! use rowflow_core::graph::{GraphBuilder, StageNode};
//! use rowflow_core::stage::{Discard, RowGenerator, StageRegistry};
//!
//! # fn main() -> rowflow_core::Result<()> {
//! let graph = GraphBuilder::new()
//!     .add(StageNode::new("gen", RowGenerator::TYPE).with_property("rows", "1000"))
//!     .add(StageNode::new("sink", Discard::TYPE))
//!     .hop("gen", "sink")
//!     .build()?;
//!
//! let engine = Engine::new(EngineConfig::default());
//! let mut pipeline = engine.prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())?;
//! pipeline.start()?;
//! pipeline.wait_until_finished();
//! assert!(pipeline.result().is_success());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod allocator;
pub mod channel;
pub mod cooperative;
pub mod engine;
pub mod graph;
pub mod partition;
pub mod row;
pub mod stage;

// Re-export key types
pub use channel::{ChannelKind, PutError, RowChannel};
pub use cooperative::CooperativeScheduler;
pub use engine::{Engine, EngineConfig, ExecutionMode, Pipeline, PrepareOptions, RowProducer, RunResult};
pub use graph::{GraphBuilder, PipelineGraph, StageNode};
pub use row::{Row, RowMeta, Value, ValueType};
pub use stage::{ProcessOutcome, Stage, StageContext, StageError, StageRegistry};

/// Result type for rowflow-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rowflow-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Graph construction or validation errors
    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    /// Partition routing errors
    #[error("Partition error: {0}")]
    Partition(#[from] partition::PartitionError),

    /// Stage errors
    #[error("Stage error: {0}")]
    Stage(#[from] stage::StageError),

    /// Engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),

    /// Configuration loading errors
    #[error("Config error: {0}")]
    Config(#[from] engine::ConfigError),
}
