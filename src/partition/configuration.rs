use crate::ids::{NodeId, PartitionId, TitId};
use crate::partition::model::{Partition, PartitionError, PartitionModel, TableOwnership};
use crate::partition::range::Range;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

/// On-disk partition assignment of one node, as written by the partition creation tooling and read
/// back at startup.
///
/// ```json
/// {
///   "node_name": "node-a",
///   "partitions": [
///     {
///       "partition_id": "p1",
///       "owner": "node-a",
///       "replication_factor": 3,
///       "latest_tit_index": null,
///       "ranges": { "people": [ { "partition_id": "p1", "lower": ..., "upper": null, "tit_index": null } ] },
///       "previous_partitions": {}
///     }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    pub node_name: NodeId,
    pub partitions: Vec<PartitionEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub partition_id: PartitionId,
    pub owner: Option<NodeId>,
    pub replication_factor: u32,
    pub latest_tit_index: Option<TitId>,
    /// Tables owned without sub-table ranges.
    #[serde(default)]
    pub tables: BTreeSet<String>,
    #[serde(default)]
    pub ranges: BTreeMap<String, Vec<Range>>,
    /// table -> partitions that owned it before this one.
    #[serde(default)]
    pub previous_partitions: BTreeMap<String, BTreeSet<PartitionId>>,
}

impl PartitionEntry {
    pub fn new(partition_id: PartitionId, owner: Option<NodeId>, replication_factor: u32) -> Self {
        PartitionEntry {
            partition_id,
            owner,
            replication_factor,
            latest_tit_index: None,
            tables: BTreeSet::new(),
            ranges: BTreeMap::new(),
            previous_partitions: BTreeMap::new(),
        }
    }

    /// Whole-table ownership of `table`.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.tables.insert(table.into());
        self
    }
}

impl PartitionConfiguration {
    pub fn new(node_name: NodeId) -> Self {
        PartitionConfiguration {
            node_name,
            partitions: vec![],
        }
    }

    pub fn with_partition(mut self, entry: PartitionEntry) -> Self {
        self.partitions.push(entry);
        self
    }

    pub fn from_model(node_name: NodeId, model: &PartitionModel) -> Self {
        let snapshot = model.snapshot();
        let mut entries: BTreeMap<PartitionId, PartitionEntry> = snapshot
            .partitions
            .values()
            .map(|p| {
                let mut entry = PartitionEntry::new(p.id.clone(), p.owner.clone(), p.replication_factor);
                entry.latest_tit_index = p.latest_tit.clone();
                (p.id.clone(), entry)
            })
            .collect();

        for (table, ownership) in &snapshot.ownership {
            let owner = match &ownership.partition {
                Some(owner) => owner,
                None => continue,
            };
            if let Some(entry) = entries.get_mut(owner) {
                if !snapshot.ranges.get(table).map_or(false, |r| !r.is_empty()) {
                    entry.tables.insert(table.clone());
                }
                if !ownership.previous_partitions.is_empty() {
                    entry
                        .previous_partitions
                        .insert(table.clone(), ownership.previous_partitions.clone());
                }
            }
        }

        for (table, ranges) in &snapshot.ranges {
            for range in ranges {
                if let Some(entry) = entries.get_mut(&range.partition_id) {
                    entry.ranges.entry(table.clone()).or_default().push(range.clone());
                }
            }
        }

        PartitionConfiguration {
            node_name,
            partitions: entries.into_iter().map(|(_, e)| e).collect(),
        }
    }

    /// Builds a model, checking ranges the same way `PartitionModel::add_range` does.
    pub fn into_model(self) -> Result<PartitionModel, ConfigFileError> {
        let model = PartitionModel::new();
        let mut previous: Vec<(String, BTreeSet<PartitionId>)> = vec![];

        for entry in &self.partitions {
            let mut partition = Partition::new(entry.partition_id.clone(), entry.owner.clone(), entry.replication_factor);
            partition.latest_tit = entry.latest_tit_index.clone();
            partition.tables = entry.tables.clone();
            model.add_partition(partition)?;
        }

        for entry in self.partitions {
            for (table, ranges) in entry.ranges {
                for mut range in ranges {
                    range.partition_id = entry.partition_id.clone();
                    model.add_range(&table, range)?;
                }
            }
            previous.extend(entry.previous_partitions);
        }

        let mut snapshot = model.snapshot();
        for (table, partitions) in previous {
            snapshot
                .ownership
                .entry(table)
                .or_insert_with(TableOwnership::default)
                .previous_partitions
                .extend(partitions);
        }

        Ok(PartitionModel::from_snapshot(snapshot))
    }

    pub fn to_json(&self) -> Result<String, ConfigFileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigFileError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigFileError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to access partition configuration file")]
    Io(#[from] io::Error),

    #[error("Malformed partition configuration: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Inconsistent partition configuration: {0}")]
    Invalid(#[from] PartitionError),
}
