//! Partitioning errors.

use crate::row::ValueType;

/// Errors raised while assigning a row to a partition.
///
/// All variants are `Copy` so the routing path never allocates on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// The key column holds a type that has no defined hash mapping.
    #[error("unsupported partition key type: {0}")]
    UnsupportedKeyType(ValueType),

    /// The modulo partitioner needs an integer key.
    #[error("modulo partitioning needs a numeric key, got {0}")]
    NonNumericKey(ValueType),

    /// The key column index is outside the row.
    #[error("key column {index} out of range for row of {len} fields")]
    KeyColumnOutOfRange {
        /// Configured key position.
        index: usize,
        /// Number of fields in the row.
        len: usize,
    },

    /// A partition count of zero was requested.
    #[error("partition count must be at least 1")]
    NoPartitions,

    /// No local stage copy serves the computed partition.
    #[error("partition {0} is not served by any local copy")]
    UnservedPartition(usize),
}
