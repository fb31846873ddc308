//! Errors raised by stages.

use crate::channel::PutFailure;
use crate::partition::PartitionError;

/// Errors raised by a stage's hooks or by its row I/O.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Stage-specific failure.
    #[error("{0}")]
    Failed(String),

    /// A stage setting is missing or malformed.
    #[error("invalid property '{key}': {reason}")]
    InvalidProperty {
        /// Property name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Routing a row to a partition failed.
    #[error("partition routing failed: {0}")]
    Partition(#[from] PartitionError),

    /// A channel refused a row.
    #[error("channel {channel} refused row: {reason}")]
    Channel {
        /// Channel identity.
        channel: String,
        /// Why the row was refused.
        reason: PutFailure,
    },

    /// No factory is registered for the stage type tag.
    #[error("unknown stage type '{0}'")]
    UnknownStageType(String),

    /// `put_error` was called on a stage without an error output.
    #[error("stage {0} has no error output")]
    NoErrorOutput(String),

    /// `put_row_to` named a stage that is not a successor.
    #[error("stage {stage} has no output to {target}")]
    UnknownOutput {
        /// Writing stage.
        stage: String,
        /// Requested target.
        target: String,
    },
}

impl StageError {
    /// Creates a stage-specific failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates an invalid-property error.
    pub fn invalid_property(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ValueType;

    #[test]
    fn test_error_display() {
        assert_eq!(StageError::failed("boom").to_string(), "boom");
        let err: StageError = PartitionError::UnsupportedKeyType(ValueType::Serializable).into();
        assert_eq!(
            err.to_string(),
            "partition routing failed: unsupported partition key type: Serializable"
        );
        assert_eq!(
            StageError::invalid_property("rows", "not a number").to_string(),
            "invalid property 'rows': not a number"
        );
    }
}
