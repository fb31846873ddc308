//! Engine errors.

use std::fmt;

use super::config::ConfigError;
use crate::graph::GraphError;

/// One stage copy whose `init` failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    /// Stage name.
    pub stage: String,
    /// Copy index.
    pub copy: usize,
    /// Failure message.
    pub message: String,
}

impl fmt::Display for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.stage, self.copy, self.message)
    }
}

fn list_failures(failures: &[InitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while preparing or driving a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The graph or the engine settings cannot be executed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The graph failed validation.
    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// The engine configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// At least one stage copy failed to initialize. No copy ran.
    #[error("{} stage copies failed to initialize: {}", failures.len(), list_failures(failures))]
    Initialization {
        /// Every failed copy.
        failures: Vec<InitFailure>,
    },

    /// A thread could not be spawned.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The operation needs a pipeline that has not started.
    #[error("pipeline already started")]
    AlreadyStarted,

    /// The operation does not apply to the pipeline's execution mode.
    #[error("operation not supported in {0} mode")]
    WrongMode(super::ExecutionMode),

    /// No stage copy matches the given name and copy index.
    #[error("no stage copy {stage}.{copy}")]
    UnknownCopy {
        /// Stage name.
        stage: String,
        /// Copy index.
        copy: usize,
    },
}

impl EngineError {
    /// Returns true for errors raised before any stage code ran.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Graph(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_lists_failures() {
        let err = EngineError::Initialization {
            failures: vec![
                InitFailure {
                    stage: "read".into(),
                    copy: 0,
                    message: "no file".into(),
                },
                InitFailure {
                    stage: "read".into(),
                    copy: 1,
                    message: "no file".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 stage copies failed to initialize: read.0: no file; read.1: no file"
        );
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_graph_error_is_configuration() {
        let err: EngineError = GraphError::EmptyGraph.into();
        assert!(err.is_configuration());
    }
}
