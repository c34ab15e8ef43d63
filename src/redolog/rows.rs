use crate::ids::{NodeId, PartitionId, RedoRecordId, TitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// `partition_info` row, keyed by partition id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfoRow {
    pub id: PartitionId,
    pub owner: Option<NodeId>,
    pub replication_factor: u32,
    pub tables: BTreeSet<String>,
    pub latest_tit: Option<TitId>,
}

/// `tit` row, keyed by TIT id. Only ever grows: redo references are appended and the applied
/// cursor only moves forward.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TitRow {
    pub id: TitId,
    pub partition: PartitionId,
    pub redo: Vec<RedoRecordId>,
    /// Index into `redo` of the last record applied, -1 when none.
    pub latest_applied: i64,
    pub applied: bool,
}

impl TitRow {
    pub(crate) fn empty(id: TitId, partition: PartitionId) -> Self {
        TitRow {
            id,
            partition,
            redo: vec![],
            latest_applied: -1,
            applied: false,
        }
    }

    /// Records after the applied cursor.
    pub fn unapplied(&self) -> &[RedoRecordId] {
        let start = (self.latest_applied + 1).max(0) as usize;
        self.redo.get(start..).unwrap_or(&[])
    }
}

/// `redo_history` row, keyed by TIT id: the TIT rows this one continues from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RedoHistoryRow {
    pub partition: PartitionId,
    pub tit: TitId,
    pub parents: Vec<TitId>,
}

/// `table_to_partition` row, keyed by table name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableToPartitionRow {
    pub table: String,
    pub partition: PartitionId,
    pub previous_partitions: BTreeSet<PartitionId>,
}
