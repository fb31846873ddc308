//! Error types for pipeline graph construction and validation.

/// Errors that can occur while building or validating a pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The graph has no stages.
    #[error("empty graph: no stages")]
    EmptyGraph,

    /// A stage with the same name already exists.
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    /// A hop or lookup references a stage that does not exist.
    #[error("stage not found: {0}")]
    StageNotFound(String),

    /// A hop with the same endpoints already exists.
    #[error("duplicate hop: {from} -> {to}")]
    DuplicateHop {
        /// Origin stage.
        from: String,
        /// Destination stage.
        to: String,
    },

    /// The enabled hops contain a cycle involving the named stage.
    #[error("cycle detected involving stage: {0}")]
    CycleDetected(String),

    /// A stage requested zero copies.
    #[error("stage {0} must run at least one copy")]
    InvalidCopies(String),

    /// The error target is not a direct, enabled successor of the stage.
    #[error("stage {stage} sends error rows to {target}, which is not a direct successor")]
    InvalidErrorTarget {
        /// Stage declaring the error handling.
        stage: String,
        /// Declared error target.
        target: String,
    },

    /// The partitioning descriptor is unusable.
    #[error("invalid partitioning on stage {stage}: {reason}")]
    InvalidPartitioning {
        /// Partitioned stage.
        stage: String,
        /// Description of the problem.
        reason: String,
    },
}
