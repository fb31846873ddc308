//! # Partition Routing
//!
//! Deterministic assignment of rows to the parallel copies of a partitioned
//! stage.
//!
//! ## Methods
//!
//! | Method   | Routing |
//! |----------|---------|
//! | `None`   | not partitioned; [`NoPartitioner`] answers 0 |
//! | `Mirror` | every row goes to every copy |
//! | `Modulo` | `abs(integer key) % partitions` |
//! | `Hash`   | lookup3 hash of the key words, `abs(hash) % partitions` |
//!
//! A partitioned stage runs one copy per partition of its schema. Copy `i`
//! owns partition `i` unless a [`PartitionDistribution`] maps copies to
//! partitions explicitly (clustered runs).
//!
//! Only a single key column is supported per scheme. A key type without a
//! defined mapping is rejected when the run is prepared.

mod distribution;
mod error;
mod hash;
pub mod lookup3;

pub use distribution::{DistributionEntry, PartitionDistribution};
pub use error::PartitionError;
pub use hash::{is_hashable, key_words, HashPartitioner, KeyWords};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::row::{Row, Value, ValueType};

/// Maps a key value to a partition number.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Number of partitions this instance routes to.
    fn partition_count(&self) -> usize;

    /// Position of the key column in incoming rows, if any.
    fn key_index(&self) -> Option<usize>;

    /// Partition of `key` among `partition_count` partitions.
    ///
    /// Pure: the same key and count always give the same answer.
    ///
    /// # Errors
    ///
    /// Returns a `PartitionError` when the key cannot be mapped.
    fn assign(&self, key: &Value, partition_count: usize) -> Result<usize, PartitionError>;

    /// Partition of `row`, reading the key column.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::KeyColumnOutOfRange` if the row is shorter
    /// than the key position, or any error from [`Partitioner::assign`].
    fn partition(&self, row: &Row) -> Result<usize, PartitionError> {
        let key = match self.key_index() {
            Some(index) => row.get(index).ok_or(PartitionError::KeyColumnOutOfRange {
                index,
                len: row.len(),
            })?,
            None => &Value::Null,
        };
        self.assign(key, self.partition_count())
    }
}

/// Partitioner for unpartitioned stages. Always answers 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPartitioner;

impl Partitioner for NoPartitioner {
    fn partition_count(&self) -> usize {
        1
    }

    fn key_index(&self) -> Option<usize> {
        None
    }

    fn assign(&self, _key: &Value, _partition_count: usize) -> Result<usize, PartitionError> {
        Ok(0)
    }
}

/// Routes integer keys by remainder.
#[derive(Debug, Clone)]
pub struct ModPartitioner {
    key_index: usize,
    partition_count: usize,
}

impl ModPartitioner {
    /// Creates a partitioner reading the key at `key_index`.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NoPartitions` if `partition_count` is zero.
    pub fn new(key_index: usize, partition_count: usize) -> Result<Self, PartitionError> {
        if partition_count == 0 {
            return Err(PartitionError::NoPartitions);
        }
        Ok(Self {
            key_index,
            partition_count,
        })
    }
}

impl Partitioner for ModPartitioner {
    fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn key_index(&self) -> Option<usize> {
        Some(self.key_index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn assign(&self, key: &Value, partition_count: usize) -> Result<usize, PartitionError> {
        if partition_count == 0 {
            return Err(PartitionError::NoPartitions);
        }
        match key {
            Value::Null => Ok(0),
            Value::Integer(_) | Value::Number(_) => {
                let v = key.as_integer().unwrap_or_default();
                Ok((v.unsigned_abs() % partition_count as u64) as usize)
            }
            other => Err(PartitionError::NonNumericKey(
                other.value_type().unwrap_or(ValueType::Serializable),
            )),
        }
    }
}

/// How rows are spread over the copies of a partitioned stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
    /// Not partitioned.
    #[default]
    None,
    /// Every copy receives every row.
    Mirror,
    /// Integer key remainder.
    Modulo,
    /// lookup3 hash of the key.
    Hash,
}

impl PartitionMethod {
    /// Returns true if the method needs a key column.
    #[must_use]
    pub fn needs_key(self) -> bool {
        matches!(self, Self::Modulo | Self::Hash)
    }

    /// Returns true if a key of `value_type` can be routed by this method.
    #[must_use]
    pub fn accepts_key_type(self, value_type: ValueType) -> bool {
        match self {
            Self::None | Self::Mirror => true,
            Self::Modulo => value_type.is_numeric(),
            Self::Hash => is_hashable(value_type),
        }
    }
}

impl fmt::Display for PartitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Mirror => "mirror",
            Self::Modulo => "modulo",
            Self::Hash => "hash",
        };
        f.write_str(name)
    }
}

/// A named set of partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSchema {
    /// Schema name.
    pub name: String,
    /// Partition identifiers; the position is the partition number.
    pub partition_ids: Vec<String>,
}

impl PartitionSchema {
    /// Creates a schema from explicit partition ids.
    #[must_use]
    pub fn new(name: impl Into<String>, partition_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            partition_ids,
        }
    }

    /// Creates a schema with `count` generated ids (`P001`, `P002`, ...).
    #[must_use]
    pub fn with_count(name: impl Into<String>, count: usize) -> Self {
        let partition_ids = (1..=count).map(|n| format!("P{n:03}")).collect();
        Self::new(name, partition_ids)
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partition_ids.len()
    }
}

/// Partitioning descriptor of a stage: method, schema and key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePartitioning {
    /// Routing method.
    pub method: PartitionMethod,
    /// Partitions the stage copies serve.
    pub schema: PartitionSchema,
    /// Key column for `Modulo` and `Hash`.
    pub key_column: Option<String>,
}

impl StagePartitioning {
    /// Hash partitioning on `key_column` over `schema`.
    #[must_use]
    pub fn hash(schema: PartitionSchema, key_column: impl Into<String>) -> Self {
        Self {
            method: PartitionMethod::Hash,
            schema,
            key_column: Some(key_column.into()),
        }
    }

    /// Modulo partitioning on `key_column` over `schema`.
    #[must_use]
    pub fn modulo(schema: PartitionSchema, key_column: impl Into<String>) -> Self {
        Self {
            method: PartitionMethod::Modulo,
            schema,
            key_column: Some(key_column.into()),
        }
    }

    /// Mirror partitioning over `schema`.
    #[must_use]
    pub fn mirror(schema: PartitionSchema) -> Self {
        Self {
            method: PartitionMethod::Mirror,
            schema,
            key_column: None,
        }
    }

    /// Returns true if the descriptor actually partitions rows.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.method != PartitionMethod::None
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.schema.partition_count()
    }

    /// Builds the partitioner routing rows into this scheme.
    ///
    /// `key_index` is the key position in the rows arriving from upstream.
    /// Returns `None` for `None` and `Mirror`, which route without a key.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NoPartitions` for an empty schema.
    pub fn partitioner(
        &self,
        key_index: usize,
    ) -> Result<Option<Arc<dyn Partitioner>>, PartitionError> {
        let count = self.partition_count();
        let partitioner: Arc<dyn Partitioner> = match self.method {
            PartitionMethod::None | PartitionMethod::Mirror => return Ok(None),
            PartitionMethod::Modulo => Arc::new(ModPartitioner::new(key_index, count)?),
            PartitionMethod::Hash => Arc::new(HashPartitioner::new(key_index, count)?),
        };
        Ok(Some(partitioner))
    }
}

/// Returns true if rows moving from a stage partitioned by `from` into a
/// stage partitioned by `to` must be re-routed through `to`'s partitioner.
#[must_use]
pub fn needs_repartitioning(
    from: Option<&StagePartitioning>,
    to: Option<&StagePartitioning>,
) -> bool {
    let from = from.filter(|p| p.is_partitioned());
    let to = to.filter(|p| p.is_partitioned());
    match (from, to) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(a), Some(b)) => a != b,
    }
}
