use crate::ids::{NodeId, PartitionId, TitId};
use crate::partition::range::{Range, RangeBound};
use crate::store::LockId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Unit of ownership. Exactly one node owns a partition at a time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    pub id: PartitionId,
    pub owner: Option<NodeId>,
    pub replication_factor: u32,
    pub tables: BTreeSet<String>,
    pub latest_tit: Option<TitId>,
}

impl Partition {
    pub fn new(id: PartitionId, owner: Option<NodeId>, replication_factor: u32) -> Self {
        Partition {
            id,
            owner,
            replication_factor,
            tables: BTreeSet::new(),
            latest_tit: None,
        }
    }
}

/// Which partition owns a table now, and which owned it before.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TableOwnership {
    pub partition: Option<PartitionId>,
    pub previous_partitions: BTreeSet<PartitionId>,
}

/// Immutable copy of the model.
#[derive(Clone, Debug, Default)]
pub struct PartitionSnapshot {
    pub partitions: BTreeMap<PartitionId, Partition>,
    pub ranges: BTreeMap<String, Vec<Range>>,
    pub ownership: BTreeMap<String, TableOwnership>,
}

/// PartitionModel maps tables, and key ranges within them, to partitions.
///
/// Readers take a read lock only long enough to copy what they need out.
#[derive(Debug)]
pub struct PartitionModel {
    state: RwLock<PartitionSnapshot>,
}

impl PartitionModel {
    pub fn new() -> Self {
        PartitionModel {
            state: RwLock::new(PartitionSnapshot::default()),
        }
    }

    pub(crate) fn from_snapshot(snapshot: PartitionSnapshot) -> Self {
        PartitionModel {
            state: RwLock::new(snapshot),
        }
    }

    pub fn add_partition(&self, partition: Partition) -> Result<(), PartitionError> {
        let mut state = self.write();
        if state.partitions.contains_key(&partition.id) {
            return Err(PartitionError::DuplicatePartition(partition.id));
        }
        for table in &partition.tables {
            state
                .ownership
                .entry(table.clone())
                .or_default()
                .partition
                .get_or_insert_with(|| partition.id.clone());
        }
        state.partitions.insert(partition.id.clone(), partition);
        Ok(())
    }

    pub fn partition(&self, id: &PartitionId) -> Option<Partition> {
        self.read().partitions.get(id).cloned()
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.read().partitions.values().cloned().collect()
    }

    /// Partitions currently owned by `node`.
    pub fn owned_by(&self, node: &NodeId) -> Vec<PartitionId> {
        self.read()
            .partitions
            .values()
            .filter(|p| p.owner.as_ref() == Some(node))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn set_partition_owner(&self, id: &PartitionId, owner: NodeId) -> Result<(), PartitionError> {
        let mut state = self.write();
        let partition = state
            .partitions
            .get_mut(id)
            .ok_or_else(|| PartitionError::partition_not_found(id))?;
        partition.owner = Some(owner);
        Ok(())
    }

    /// Also stamps every range of the partition as synchronized to `tit`.
    pub fn set_latest_tit(&self, id: &PartitionId, tit: TitId) -> Result<(), PartitionError> {
        let mut state = self.write();
        let partition = state
            .partitions
            .get_mut(id)
            .ok_or_else(|| PartitionError::partition_not_found(id))?;
        partition.latest_tit = Some(tit.clone());

        for range in state.ranges.values_mut().flatten() {
            if &range.partition_id == id {
                range.tit_index = Some(tit.clone());
            }
        }
        Ok(())
    }

    pub fn add_range(&self, table: &str, range: Range) -> Result<(), PartitionError> {
        if !range.is_valid() {
            return Err(PartitionError::InvalidRange {
                table: table.to_string(),
            });
        }

        let mut state = self.write();
        if !state.partitions.contains_key(&range.partition_id) {
            return Err(PartitionError::partition_not_found(&range.partition_id));
        }

        let existing = state.ranges.entry(table.to_string()).or_default();
        if let Some(conflict) = existing.iter().find(|r| r.overlaps(&range)) {
            return Err(PartitionError::Overlap {
                table: table.to_string(),
                existing: conflict.partition_id.clone(),
            });
        }
        let partition_id = range.partition_id.clone();
        existing.push(range);
        existing.sort_by(|a, b| a.lower.cmp(&b.lower));

        state
            .ownership
            .entry(table.to_string())
            .or_default()
            .partition
            .get_or_insert_with(|| partition_id.clone());
        if let Some(partition) = state.partitions.get_mut(&partition_id) {
            partition.tables.insert(table.to_string());
        }
        Ok(())
    }

    /// Removes the range of `table` with exactly the bounds of `range`.
    pub fn delete_range(&self, table: &str, range: &Range) -> Result<Range, PartitionError> {
        let mut state = self.write();
        let ranges = state
            .ranges
            .get_mut(table)
            .ok_or_else(|| PartitionError::table_not_found(table))?;
        let position = ranges
            .iter()
            .position(|r| r.same_bounds(range))
            .ok_or_else(|| PartitionError::NotFound(format!("range {:?}..{:?} of {}", range.lower, range.upper, table)))?;

        Ok(ranges.remove(position))
    }

    pub fn ranges(&self, table: &str) -> Vec<Range> {
        self.read().ranges.get(table).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        self.read().clone()
    }

    pub fn owner_of(&self, table: &str) -> Option<PartitionId> {
        self.read().ownership.get(table).and_then(|o| o.partition.clone())
    }

    pub fn ownership(&self, table: &str) -> Option<TableOwnership> {
        self.read().ownership.get(table).cloned()
    }

    /// Gives `table` to `partition` if no partition owns it yet. Returns the owner either way.
    pub fn assign_table_if_unowned(&self, table: &str, partition: &PartitionId) -> Result<PartitionId, PartitionError> {
        let mut state = self.write();
        if !state.partitions.contains_key(partition) {
            return Err(PartitionError::partition_not_found(partition));
        }

        let owner = state
            .ownership
            .entry(table.to_string())
            .or_default()
            .partition
            .get_or_insert_with(|| partition.clone())
            .clone();
        if let Some(p) = state.partitions.get_mut(&owner) {
            p.tables.insert(table.to_string());
        }
        Ok(owner)
    }

    /// Moves `table` and its ranges to `new_partition`, recording the previous owner exactly once.
    ///
    /// Returns the previous partition, or `None` if nothing changed.
    pub fn reassign_owner(&self, table: &str, new_partition: &PartitionId) -> Result<Option<PartitionId>, PartitionError> {
        let mut state = self.write();
        if !state.partitions.contains_key(new_partition) {
            return Err(PartitionError::partition_not_found(new_partition));
        }

        let ownership = state
            .ownership
            .get_mut(table)
            .ok_or_else(|| PartitionError::table_not_found(table))?;
        let previous = match &ownership.partition {
            Some(current) if current == new_partition => return Ok(None),
            other => other.clone(),
        };
        if let Some(previous) = &previous {
            ownership.previous_partitions.insert(previous.clone());
        }
        ownership.partition = Some(new_partition.clone());

        if let Some(previous) = &previous {
            if let Some(p) = state.partitions.get_mut(previous) {
                p.tables.remove(table);
            }
        }
        if let Some(p) = state.partitions.get_mut(new_partition) {
            p.tables.insert(table.to_string());
        }
        if let Some(ranges) = state.ranges.get_mut(table) {
            for range in ranges.iter_mut() {
                range.partition_id = new_partition.clone();
            }
        }

        Ok(previous)
    }

    pub fn set_range_lock(&self, table: &str, range: &Range, lock: Option<LockId>) -> Result<(), PartitionError> {
        let mut state = self.write();
        let found = state
            .ranges
            .get_mut(table)
            .and_then(|ranges| ranges.iter_mut().find(|r| r.same_bounds(range)))
            .ok_or_else(|| PartitionError::NotFound(format!("range of {}", table)))?;
        found.lock_id = lock;
        Ok(())
    }

    /// Partition owning the range of `table` that contains `bound`. Falls back to the table owner for
    /// tables without ranges.
    pub fn partition_for_key(&self, table: &str, bound: &RangeBound) -> Option<PartitionId> {
        let state = self.read();
        match state.ranges.get(table) {
            Some(ranges) if !ranges.is_empty() => ranges
                .iter()
                .find(|r| r.contains(bound))
                .map(|r| r.partition_id.clone()),
            _ => state.ownership.get(table).and_then(|o| o.partition.clone()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PartitionSnapshot> {
        self.state.read().expect("PartitionModel lock poison")
    }

    fn write(&self) -> RwLockWriteGuard<'_, PartitionSnapshot> {
        self.state.write().expect("PartitionModel lock poison")
    }
}

impl Default for PartitionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("Range of {table} overlaps a range owned by partition {existing}")]
    Overlap { table: String, existing: PartitionId },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Empty or inverted range for {table}")]
    InvalidRange { table: String },

    #[error("Partition {0} already exists")]
    DuplicatePartition(PartitionId),
}

impl PartitionError {
    pub(crate) fn partition_not_found(id: &PartitionId) -> Self {
        PartitionError::NotFound(format!("partition {}", id))
    }

    pub(crate) fn table_not_found(table: &str) -> Self {
        PartitionError::NotFound(format!("table {}", table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(partitions: &[&str]) -> PartitionModel {
        let model = PartitionModel::new();
        for p in partitions {
            model
                .add_partition(Partition::new(PartitionId::new(*p), Some(NodeId::new("n1")), 3))
                .unwrap();
        }
        model
    }

    fn range(p: &str, lower: &str, upper: Option<&str>) -> Range {
        Range::new(
            PartitionId::new(p),
            RangeBound::new(lower, ""),
            upper.map(|u| RangeBound::new(u, "")),
        )
    }

    #[test]
    fn overlapping_range_is_rejected() {
        let model = model_with(&["p1", "p2"]);
        model.add_range("t", range("p1", "a", Some("m"))).unwrap();

        let err = model.add_range("t", range("p2", "c", Some("z"))).unwrap_err();
        assert!(matches!(err, PartitionError::Overlap { .. }));

        model.add_range("t", range("p2", "m", None)).unwrap();
        assert_eq!(model.ranges("t").len(), 2);
    }

    #[test]
    fn ranges_of_different_tables_are_independent() {
        let model = model_with(&["p1"]);
        model.add_range("t1", range("p1", "a", None)).unwrap();
        model.add_range("t2", range("p1", "a", None)).unwrap();
    }

    #[test]
    fn delete_range_matches_bounds_only() {
        let model = model_with(&["p1", "p2"]);
        model.add_range("t", range("p1", "a", Some("m"))).unwrap();

        let mut lookup = range("p2", "a", Some("m"));
        lookup.tit_index = Some(TitId::new("other"));
        model.delete_range("t", &lookup).unwrap();
        assert!(model.ranges("t").is_empty());

        assert!(matches!(
            model.delete_range("t", &lookup),
            Err(PartitionError::NotFound(_))
        ));
        assert!(matches!(
            model.delete_range("nope", &lookup),
            Err(PartitionError::NotFound(_))
        ));
    }

    #[test]
    fn reassignment_records_each_previous_owner_once() {
        let model = model_with(&["p1", "p2", "p3"]);
        model.add_range("t", range("p1", "", None)).unwrap();

        assert_eq!(model.reassign_owner("t", &PartitionId::new("p2")).unwrap(), Some(PartitionId::new("p1")));
        assert_eq!(model.reassign_owner("t", &PartitionId::new("p2")).unwrap(), None);
        model.reassign_owner("t", &PartitionId::new("p1")).unwrap();
        model.reassign_owner("t", &PartitionId::new("p3")).unwrap();

        let ownership = model.ownership("t").unwrap();
        assert_eq!(ownership.partition, Some(PartitionId::new("p3")));
        let previous: Vec<_> = ownership.previous_partitions.into_iter().collect();
        assert_eq!(previous, vec![PartitionId::new("p1"), PartitionId::new("p2")]);
        assert_eq!(model.ranges("t")[0].partition_id, PartitionId::new("p3"));
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let model = model_with(&["p1"]);
        model.add_range("t", range("p1", "a", Some("b"))).unwrap();
        let snapshot = model.snapshot();

        model.add_range("t", range("p1", "b", None)).unwrap();
        assert_eq!(snapshot.ranges["t"].len(), 1);
    }

    #[test]
    fn latest_tit_stamps_ranges() {
        let model = model_with(&["p1"]);
        model.add_range("t", range("p1", "", None)).unwrap();
        model.set_latest_tit(&PartitionId::new("p1"), TitId::new("tit-1")).unwrap();

        assert_eq!(model.ranges("t")[0].tit_index, Some(TitId::new("tit-1")));
        assert_eq!(model.partition(&PartitionId::new("p1")).unwrap().latest_tit, Some(TitId::new("tit-1")));
    }

    #[test]
    fn key_lookup_uses_ranges() {
        let model = model_with(&["p1", "p2"]);
        model.add_range("t", range("p1", "", Some("m"))).unwrap();
        model.add_range("t", range("p2", "m", None)).unwrap();

        assert_eq!(model.partition_for_key("t", &RangeBound::new("q", "")), Some(PartitionId::new("p2")));
        assert_eq!(model.partition_for_key("t", &RangeBound::new("c", "")), Some(PartitionId::new("p1")));
    }

    #[test]
    fn range_lock_is_tracked_per_range() {
        let model = model_with(&["p1"]);
        model.add_range("t", Range::whole_table(PartitionId::new("p1"))).unwrap();

        let lock = LockId::generate();
        model
            .set_range_lock("t", &Range::whole_table(PartitionId::new("p1")), Some(lock.clone()))
            .unwrap();
        assert_eq!(model.ranges("t")[0].lock_id, Some(lock));

        let err = model
            .set_range_lock("u", &Range::whole_table(PartitionId::new("p1")), None)
            .unwrap_err();
        assert!(matches!(err, PartitionError::NotFound(_)));
    }
}
