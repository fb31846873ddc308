//! Precomputed partition ownership for clustered runs.

use std::collections::BTreeMap;
use std::path::Path;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One row of the distribution table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistributionEntry {
    /// Host (process) identifier.
    pub host: String,
    /// Partitioned stage name.
    pub stage: String,
    /// Copy index of the stage on that host.
    pub copy: usize,
    /// Partition the copy serves.
    pub partition: usize,
}

/// Immutable mapping `(host, stage, copy) -> partition`.
///
/// Computed once before a distributed run and shipped to every process, so
/// all processes agree on which copy owns which partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DistributionEntry>", into = "Vec<DistributionEntry>")]
pub struct PartitionDistribution {
    index: FxHashMap<(String, String, usize), usize>,
}

impl PartitionDistribution {
    /// Builds a distribution from explicit entries. Later entries win.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = DistributionEntry>) -> Self {
        let index = entries
            .into_iter()
            .map(|e| ((e.host, e.stage, e.copy), e.partition))
            .collect();
        Self { index }
    }

    /// Deals the partitions of `stage` over `hosts` in turn.
    ///
    /// Partition `p` goes to host `p % hosts.len()`; each host numbers its
    /// copies from 0 in partition order.
    #[must_use]
    pub fn round_robin(hosts: &[String], stage: &str, partition_count: usize) -> Self {
        if hosts.is_empty() {
            return Self::default();
        }
        let mut next_copy: BTreeMap<&str, usize> = BTreeMap::new();
        let entries = (0..partition_count).map(|partition| {
            let host = &hosts[partition % hosts.len()];
            let copy = next_copy.entry(host.as_str()).or_insert(0);
            let entry = DistributionEntry {
                host: host.clone(),
                stage: stage.to_string(),
                copy: *copy,
                partition,
            };
            *copy += 1;
            entry
        });
        Self::new(entries.collect::<Vec<_>>())
    }

    /// Partition served by `copy` of `stage` on `host`.
    #[must_use]
    pub fn partition_for(&self, host: &str, stage: &str, copy: usize) -> Option<usize> {
        self.index
            .get(&(host.to_string(), stage.to_string(), copy))
            .copied()
    }

    /// Number of copies of `stage` placed on `host`.
    #[must_use]
    pub fn copies_on(&self, host: &str, stage: &str) -> usize {
        self.index
            .keys()
            .filter(|(h, s, _)| h == host && s == stage)
            .count()
    }

    /// Returns true if `stage` has any entry.
    #[must_use]
    pub fn covers(&self, stage: &str) -> bool {
        self.index.keys().any(|(_, s, _)| s == stage)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries in sorted order.
    #[must_use]
    pub fn entries(&self) -> Vec<DistributionEntry> {
        let mut entries: Vec<_> = self
            .index
            .iter()
            .map(|((host, stage, copy), partition)| DistributionEntry {
                host: host.clone(),
                stage: stage.clone(),
                copy: *copy,
                partition: *partition,
            })
            .collect();
        entries.sort();
        entries
    }

    /// Parses a distribution from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a distribution from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or an
    /// `InvalidData` error wrapping the parse failure.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl From<Vec<DistributionEntry>> for PartitionDistribution {
    fn from(entries: Vec<DistributionEntry>) -> Self {
        Self::new(entries)
    }
}

impl From<PartitionDistribution> for Vec<DistributionEntry> {
    fn from(distribution: PartitionDistribution) -> Self {
        distribution.entries()
    }
}
