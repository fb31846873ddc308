//! # Pipeline Graph
//!
//! Static description of a pipeline: stages ([`StageNode`]) connected by
//! directed hops ([`HopEdge`]).
//!
//! The graph is produced by an outside collaborator and consumed read-only by
//! the engine. [`PipelineGraph::validate`] rejects cycles among enabled hops,
//! error targets that are not direct successors, and unusable partitioning
//! descriptors. Disabled hops stay in the graph but are ignored by
//! allocation and ordering.
//!
//! ```text
//!            ┌──────────┐
//! source ──▶ │ filter×2 │ ──▶ sink
//!            └──────────┘
//!                 │ error rows
//!                 ▼
//!              rejects
//! ```

mod builder;
mod error;
mod reach;
mod topology;


pub use builder::GraphBuilder;
pub use error::GraphError;
pub use reach::{stable_dependency_order, Reachability};
pub use topology::{ErrorHandling, HopEdge, HopId, PipelineGraph, StageId, StageNode};
