use crate::ids::{NodeId, PartitionId, RedoRecordId, TitId};
use crate::redolog::rows::{PartitionInfoRow, RedoHistoryRow, TableToPartitionRow, TitRow};
use crate::redolog::tables::RedoLogTables;
use crate::staging::StagingError;
use crate::store::{lock_resource, LocalStoreError, LockId, RemoteStore, StoreError, StoreRead, StoreWrite, WriteMode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;

/// RedoLog is the crash-recovery log kept in the distributed store.
///
/// ```text
/// partition_info[partition] --latest_tit--> tit[tit] --redo[i]--> redo_records[(lease, counter)]
///                                              ^
///                          redo_history[tit] --parents
/// ```
///
/// Partition rows, TIT rows and history rows change under distributed locks. Redo records have
/// fresh keys and are written without one.
pub struct RedoLog {
    logger: slog::Logger,
    store: RemoteStore,
    tables: RedoLogTables,
}

impl RedoLog {
    pub fn new(logger: slog::Logger, store: RemoteStore, tables: RedoLogTables) -> Self {
        RedoLog { logger, store, tables }
    }

    pub fn tables(&self) -> &RedoLogTables {
        &self.tables
    }

    /// Safe to call concurrently from every node.
    pub async fn create_structures(&self) -> Result<(), RedoLogError> {
        for table in self.tables.all().iter() {
            self.store.create_table(table).await?;
        }
        slog::info!(self.logger, "Redo log tables ready");
        Ok(())
    }

    // -- Partition info --

    pub async fn create_partition_info_row(
        &self,
        replication_factor: u32,
        tables: BTreeSet<String>,
        owner: Option<NodeId>,
    ) -> Result<PartitionId, RedoLogError> {
        let row = PartitionInfoRow {
            id: PartitionId::generate(),
            owner,
            replication_factor,
            tables,
            latest_tit: None,
        };
        let id = row.id.clone();
        self.insert_partition_info_row(row).await?;
        slog::info!(self.logger, "Created partition {}", id);
        Ok(id)
    }

    /// Inserts the row unless a row for the same partition exists. Returns the stored row.
    pub async fn ensure_partition_info_row(&self, row: PartitionInfoRow) -> Result<PartitionInfoRow, RedoLogError> {
        let id = row.id.clone();
        match self.insert_partition_info_row(row.clone()).await {
            Ok(()) => Ok(row),
            Err(RedoLogError::RemoteWriteFailure(StoreError::KeyExists { .. })) => self.partition_info(&id).await,
            Err(e) => Err(e),
        }
    }

    async fn insert_partition_info_row(&self, row: PartitionInfoRow) -> Result<(), RedoLogError> {
        let write = StoreWrite::Insert {
            table: self.tables.partition_info.clone(),
            key: row.id.as_str().to_string(),
            value: encode(&row)?,
        };
        self.store.write(write, WriteMode::Critical(None)).await?;
        Ok(())
    }

    pub async fn partition_info(&self, partition: &PartitionId) -> Result<PartitionInfoRow, RedoLogError> {
        self.read_row(&self.tables.partition_info, partition.as_str())
            .await?
            .ok_or_else(|| RedoLogError::NotFound(format!("partition info {}", partition)))
    }

    /// With `lock == None` the partition lock is taken for the duration of the update.
    pub async fn update_owner_and_latest_tit(
        &self,
        partition: &PartitionId,
        owner: NodeId,
        tit: TitId,
        lock: Option<&LockId>,
    ) -> Result<(), RedoLogError> {
        match lock {
            Some(lock) => self.write_owner_and_latest_tit(lock, partition, owner, tit).await,
            None => {
                let lock = self.lock_partition(partition).await?;
                let result = self.write_owner_and_latest_tit(&lock, partition, owner, tit).await;
                self.store.release_lock_logged(lock).await;
                result
            }
        }
    }

    async fn write_owner_and_latest_tit(
        &self,
        lock: &LockId,
        partition: &PartitionId,
        owner: NodeId,
        tit: TitId,
    ) -> Result<(), RedoLogError> {
        let mut row = self.partition_info(partition).await?;
        row.owner = Some(owner);
        row.latest_tit = Some(tit);

        let write = StoreWrite::Put {
            table: self.tables.partition_info.clone(),
            key: partition.as_str().to_string(),
            value: encode(&row)?,
        };
        self.store.write(write, WriteMode::Critical(Some(lock.clone()))).await?;
        Ok(())
    }

    pub(crate) async fn lock_partition(&self, partition: &PartitionId) -> Result<LockId, RedoLogError> {
        Ok(self
            .store
            .acquire_lock(&lock_resource(&self.tables.partition_info, partition.as_str()))
            .await?)
    }

    // -- TIT rows --

    pub async fn create_empty_tit_row(&self, partition: &PartitionId) -> Result<TitId, RedoLogError> {
        let row = TitRow::empty(TitId::generate(), partition.clone());
        let write = StoreWrite::Insert {
            table: self.tables.tit.clone(),
            key: row.id.as_str().to_string(),
            value: encode(&row)?,
        };
        self.store.write(write, WriteMode::Critical(None)).await?;
        Ok(row.id)
    }

    pub async fn tit_row(&self, tit: &TitId) -> Result<TitRow, RedoLogError> {
        self.read_row(&self.tables.tit, tit.as_str())
            .await?
            .ok_or_else(|| RedoLogError::NotFound(format!("TIT row {}", tit)))
    }

    /// Adds `record` to the TIT row's redo list. Appending a record already in the list is a no-op.
    ///
    /// A record lands before any unapplied record of the same lease with a higher counter, so that a
    /// lease's records stay in counter order even when commits finish out of order.
    pub async fn append_redo_to_tit(&self, tit: &TitId, record: &RedoRecordId) -> Result<(), RedoLogError> {
        let lock = self.lock_tit(tit).await?;
        let result = self.append_redo_to_tit_locked(&lock, tit, record).await;
        self.store.release_lock_logged(lock).await;
        result
    }

    async fn append_redo_to_tit_locked(
        &self,
        lock: &LockId,
        tit: &TitId,
        record: &RedoRecordId,
    ) -> Result<(), RedoLogError> {
        let mut row = self.tit_row(tit).await?;
        if row.redo.contains(record) {
            return Ok(());
        }

        let first_unapplied = (row.latest_applied + 1).max(0) as usize;
        let applied_later = row.redo[..first_unapplied.min(row.redo.len())]
            .iter()
            .any(|r| r.lease_id == record.lease_id && r.lease_counter > record.lease_counter);
        if applied_later {
            return Err(RedoLogError::OutOfOrder {
                tit: tit.clone(),
                record: record.clone(),
            });
        }

        let position = row
            .redo
            .iter()
            .enumerate()
            .skip(first_unapplied)
            .find(|(_, r)| r.lease_id == record.lease_id && r.lease_counter > record.lease_counter)
            .map(|(i, _)| i)
            .unwrap_or_else(|| row.redo.len());
        row.redo.insert(position, record.clone());
        row.applied = false;

        self.put_tit_row(lock, &row).await
    }

    /// Moves the applied cursor forward to `latest_applied`. Never moves it back.
    pub async fn advance_applied(&self, tit: &TitId, latest_applied: i64) -> Result<TitRow, RedoLogError> {
        let lock = self.lock_tit(tit).await?;
        let result = self.advance_applied_locked(&lock, tit, latest_applied).await;
        self.store.release_lock_logged(lock).await;
        result
    }

    async fn advance_applied_locked(
        &self,
        lock: &LockId,
        tit: &TitId,
        latest_applied: i64,
    ) -> Result<TitRow, RedoLogError> {
        let mut row = self.tit_row(tit).await?;
        if latest_applied > row.latest_applied {
            row.latest_applied = latest_applied.min(row.redo.len() as i64 - 1);
        }
        row.applied = row.latest_applied + 1 >= row.redo.len() as i64;
        self.put_tit_row(lock, &row).await?;
        Ok(row)
    }

    /// Marks `record` applied if it is the first unapplied record of the TIT row. Returns whether
    /// the cursor moved.
    pub async fn mark_applied(&self, tit: &TitId, record: &RedoRecordId) -> Result<bool, RedoLogError> {
        let lock = self.lock_tit(tit).await?;
        let result = self.mark_applied_locked(&lock, tit, record).await;
        self.store.release_lock_logged(lock).await;
        result
    }

    async fn mark_applied_locked(&self, lock: &LockId, tit: &TitId, record: &RedoRecordId) -> Result<bool, RedoLogError> {
        let row = self.tit_row(tit).await?;
        let next = row.latest_applied + 1;
        let position = row.redo.iter().position(|r| r == record).map(|p| p as i64);
        if position != Some(next) {
            return Ok(false);
        }

        self.advance_applied_locked(lock, tit, next).await?;
        Ok(true)
    }

    async fn put_tit_row(&self, lock: &LockId, row: &TitRow) -> Result<(), RedoLogError> {
        let write = StoreWrite::Put {
            table: self.tables.tit.clone(),
            key: row.id.as_str().to_string(),
            value: encode(row)?,
        };
        self.store.write(write, WriteMode::Critical(Some(lock.clone()))).await?;
        Ok(())
    }

    async fn lock_tit(&self, tit: &TitId) -> Result<LockId, RedoLogError> {
        Ok(self.store.acquire_lock(&lock_resource(&self.tables.tit, tit.as_str())).await?)
    }

    // -- Redo records --

    /// Insert-if-absent. Re-appending the identical digest under the same id succeeds, so an
    /// interrupted commit can be retried; any other existing value is a collision.
    pub async fn append_redo_record(&self, record: &RedoRecordId, digest: Bytes) -> Result<(), RedoLogError> {
        let write = StoreWrite::Insert {
            table: self.tables.redo_records.clone(),
            key: record.store_key(),
            value: digest.clone(),
        };

        match self.store.write(write, WriteMode::Eventual).await {
            Ok(()) => Ok(()),
            Err(StoreError::KeyExists { .. }) => {
                let existing = self.redo_record(record).await?;
                if existing == digest {
                    slog::debug!(self.logger, "Redo record {:?} already present", record);
                    Ok(())
                } else {
                    Err(RedoLogError::RecordCollision(record.clone()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn redo_record(&self, record: &RedoRecordId) -> Result<Bytes, RedoLogError> {
        let read = StoreRead::Key {
            table: self.tables.redo_records.clone(),
            key: record.store_key(),
        };
        self.store
            .read(read)
            .await?
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| RedoLogError::NotFound(format!("redo record {:?}", record)))
    }

    // -- History --

    /// Records that `current` continues from `parents`. The first TIT row of a partition has none.
    pub async fn append_history_edge(
        &self,
        partition: &PartitionId,
        current: &TitId,
        parents: Vec<TitId>,
    ) -> Result<(), RedoLogError> {
        let row = RedoHistoryRow {
            partition: partition.clone(),
            tit: current.clone(),
            parents,
        };
        let write = StoreWrite::Insert {
            table: self.tables.redo_history.clone(),
            key: current.as_str().to_string(),
            value: encode(&row)?,
        };

        match self.store.write(write, WriteMode::Critical(None)).await {
            Ok(()) => Ok(()),
            Err(StoreError::KeyExists { .. }) => match self.history_row(current).await? {
                Some(existing) if existing == row => Ok(()),
                _ => Err(RedoLogError::HistoryConflict(current.clone())),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history_row(&self, tit: &TitId) -> Result<Option<RedoHistoryRow>, RedoLogError> {
        self.read_row(&self.tables.redo_history, tit.as_str()).await
    }

    pub async fn history_parents(&self, tit: &TitId) -> Result<Vec<TitId>, RedoLogError> {
        Ok(self.history_row(tit).await?.map(|r| r.parents).unwrap_or_default())
    }

    /// TIT rows of a partition from the first to the latest, following first parents.
    pub async fn history_chain(&self, partition: &PartitionId) -> Result<Vec<TitId>, RedoLogError> {
        let mut chain = vec![];
        let mut next = self.partition_info(partition).await?.latest_tit;
        while let Some(tit) = next {
            if chain.contains(&tit) {
                return Err(RedoLogError::HistoryConflict(tit));
            }
            next = self.history_parents(&tit).await?.into_iter().next();
            chain.push(tit);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Gives a partition its first TIT row and history root. Returns the partition's latest TIT,
    /// which is the existing one if the partition was already initialized.
    pub async fn initialize_partition_history(&self, partition: &PartitionId, owner: NodeId) -> Result<TitId, RedoLogError> {
        let lock = self.lock_partition(partition).await?;
        let result = self.initialize_partition_history_locked(&lock, partition, owner).await;
        self.store.release_lock_logged(lock).await;

        if let Ok(tit) = &result {
            slog::info!(self.logger, "Partition {} history starts at {}", partition, tit);
        }
        result
    }

    async fn initialize_partition_history_locked(
        &self,
        lock: &LockId,
        partition: &PartitionId,
        owner: NodeId,
    ) -> Result<TitId, RedoLogError> {
        let info = self.partition_info(partition).await?;
        if let Some(tit) = info.latest_tit {
            return Ok(tit);
        }

        let tit = self.create_empty_tit_row(partition).await?;
        self.append_history_edge(partition, &tit, vec![]).await?;
        self.write_owner_and_latest_tit(lock, partition, owner, tit.clone()).await?;
        Ok(tit)
    }

    /// Hands the partition to `new_owner`: a fresh TIT row chained after the current latest one
    /// becomes the partition's latest. Returns `(new, previous)`.
    pub async fn take_ownership(
        &self,
        partition: &PartitionId,
        new_owner: NodeId,
    ) -> Result<(TitId, Option<TitId>), RedoLogError> {
        let lock = self.lock_partition(partition).await?;
        let result = self.take_ownership_locked(&lock, partition, new_owner.clone()).await;
        self.store.release_lock_logged(lock).await;

        if let Ok((tit, previous)) = &result {
            slog::info!(
                self.logger,
                "{} took ownership of partition {} at {} (previous {:?})",
                new_owner,
                partition,
                tit,
                previous
            );
        }
        result
    }

    async fn take_ownership_locked(
        &self,
        lock: &LockId,
        partition: &PartitionId,
        new_owner: NodeId,
    ) -> Result<(TitId, Option<TitId>), RedoLogError> {
        let previous = self.partition_info(partition).await?.latest_tit;

        let tit = self.create_empty_tit_row(partition).await?;
        let parents = previous.iter().cloned().collect();
        self.append_history_edge(partition, &tit, parents).await?;
        self.write_owner_and_latest_tit(lock, partition, new_owner, tit.clone())
            .await?;
        Ok((tit, previous))
    }

    // -- Table directory --

    /// Creates the directory row unless one exists. Returns the stored row.
    pub async fn create_table_to_partition_row(
        &self,
        table: &str,
        partition: &PartitionId,
    ) -> Result<TableToPartitionRow, RedoLogError> {
        let row = TableToPartitionRow {
            table: table.to_string(),
            partition: partition.clone(),
            previous_partitions: BTreeSet::new(),
        };
        let write = StoreWrite::Insert {
            table: self.tables.table_to_partition.clone(),
            key: table.to_string(),
            value: encode(&row)?,
        };

        match self.store.write(write, WriteMode::Critical(None)).await {
            Ok(()) => Ok(row),
            Err(StoreError::KeyExists { .. }) => self
                .table_partition(table)
                .await?
                .ok_or_else(|| RedoLogError::NotFound(format!("table directory row {}", table))),
            Err(e) => Err(e.into()),
        }
    }

    /// Points `table` at `partition`, recording the previous partition once.
    pub async fn update_table_to_partition(
        &self,
        table: &str,
        partition: &PartitionId,
    ) -> Result<TableToPartitionRow, RedoLogError> {
        let lock = self
            .store
            .acquire_lock(&lock_resource(&self.tables.table_to_partition, table))
            .await?;
        let result = self.update_table_to_partition_locked(&lock, table, partition).await;
        self.store.release_lock_logged(lock).await;
        result
    }

    async fn update_table_to_partition_locked(
        &self,
        lock: &LockId,
        table: &str,
        partition: &PartitionId,
    ) -> Result<TableToPartitionRow, RedoLogError> {
        let mut row = self
            .table_partition(table)
            .await?
            .ok_or_else(|| RedoLogError::NotFound(format!("table directory row {}", table)))?;
        if &row.partition == partition {
            return Ok(row);
        }
        row.previous_partitions.insert(row.partition.clone());
        row.partition = partition.clone();

        let write = StoreWrite::Put {
            table: self.tables.table_to_partition.clone(),
            key: table.to_string(),
            value: encode(&row)?,
        };
        self.store.write(write, WriteMode::Critical(Some(lock.clone()))).await?;
        Ok(row)
    }

    pub async fn table_partition(&self, table: &str) -> Result<Option<TableToPartitionRow>, RedoLogError> {
        self.read_row(&self.tables.table_to_partition, table).await
    }

    async fn read_row<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>, RedoLogError> {
        let read = StoreRead::Key {
            table: table.to_string(),
            key: key.to_string(),
        };
        match self.store.read(read).await?.into_iter().next() {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }
}

fn encode<T: Serialize>(row: &T) -> Result<Bytes, RedoLogError> {
    Ok(Bytes::from(serde_json::to_vec(row)?))
}

#[derive(Debug, thiserror::Error)]
pub enum RedoLogError {
    #[error("Distributed store write or read failed")]
    RemoteWriteFailure(#[source] StoreError),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Redo record {0:?} already exists with different content")]
    RecordCollision(RedoRecordId),

    #[error("History for TIT row {0} conflicts with what is stored")]
    HistoryConflict(TitId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt redo log row")]
    Corrupt(#[from] serde_json::Error),

    #[error("Redo record {record:?} is older than an applied record of its lease in TIT row {tit}")]
    OutOfOrder { tit: TitId, record: RedoRecordId },

    #[error("Corrupt redo record digest")]
    Digest(#[from] StagingError),

    #[error("Failed to apply redo record to local store")]
    LocalApply(#[from] LocalStoreError),
}

impl RedoLogError {
    /// True if the failure came from not reaching the distributed store.
    pub fn is_unreachable(&self) -> bool {
        match self {
            RedoLogError::RemoteWriteFailure(e) => e.is_unreachable(),
            _ => false,
        }
    }
}

// ------- Conversions --------

impl From<StoreError> for RedoLogError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout(resource) => RedoLogError::LockTimeout(resource),
            other => RedoLogError::RemoteWriteFailure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DistributedStore, InMemoryDistributedStore};
    use std::sync::Arc;
    use tokio::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn redo_log() -> (RedoLog, Arc<InMemoryDistributedStore>) {
        let inner = Arc::new(InMemoryDistributedStore::new());
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let store = RemoteStore::new(
            logger.clone(),
            inner.clone(),
            Duration::from_secs(1),
            Duration::from_millis(200),
            CancellationToken::new(),
        );
        let log = RedoLog::new(logger, store, RedoLogTables::new("test"));
        log.create_structures().await.unwrap();
        (log, inner)
    }

    fn record(lease: &str, counter: u64) -> RedoRecordId {
        RedoRecordId::new(lease.into(), counter)
    }

    #[tokio::test]
    async fn create_structures_is_idempotent() {
        let (log, inner) = redo_log().await;
        log.create_structures().await.unwrap();
        assert!(inner.table_exists("test.tit"));
    }

    #[tokio::test]
    async fn new_tit_row_is_empty_and_unapplied() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(3, BTreeSet::new(), None).await.unwrap();
        let tit = log.create_empty_tit_row(&p).await.unwrap();

        let row = log.tit_row(&tit).await.unwrap();
        assert_eq!(row.latest_applied, -1);
        assert!(!row.applied);
        assert!(row.redo.is_empty());
    }

    #[tokio::test]
    async fn redo_record_collision_is_reported_but_identical_retry_is_not() {
        let (log, _) = redo_log().await;
        let id = record("l", 0);

        log.append_redo_record(&id, Bytes::from_static(b"one")).await.unwrap();
        log.append_redo_record(&id, Bytes::from_static(b"one")).await.unwrap();
        let err = log.append_redo_record(&id, Bytes::from_static(b"two")).await.unwrap_err();

        assert!(matches!(err, RedoLogError::RecordCollision(_)));
        assert_eq!(log.redo_record(&id).await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn tit_keeps_lease_records_in_counter_order() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(1, BTreeSet::new(), None).await.unwrap();
        let tit = log.create_empty_tit_row(&p).await.unwrap();

        log.append_redo_to_tit(&tit, &record("a", 2)).await.unwrap();
        log.append_redo_to_tit(&tit, &record("b", 0)).await.unwrap();
        log.append_redo_to_tit(&tit, &record("a", 1)).await.unwrap();
        log.append_redo_to_tit(&tit, &record("a", 1)).await.unwrap();

        let row = log.tit_row(&tit).await.unwrap();
        assert_eq!(row.redo, vec![record("a", 1), record("a", 2), record("b", 0)]);
    }

    #[tokio::test]
    async fn mark_applied_only_moves_past_the_next_record() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(1, BTreeSet::new(), None).await.unwrap();
        let tit = log.create_empty_tit_row(&p).await.unwrap();
        log.append_redo_to_tit(&tit, &record("a", 0)).await.unwrap();
        log.append_redo_to_tit(&tit, &record("b", 0)).await.unwrap();

        assert!(!log.mark_applied(&tit, &record("b", 0)).await.unwrap());
        assert_eq!(log.tit_row(&tit).await.unwrap().latest_applied, -1);

        assert!(log.mark_applied(&tit, &record("a", 0)).await.unwrap());
        assert!(log.mark_applied(&tit, &record("b", 0)).await.unwrap());
        let row = log.tit_row(&tit).await.unwrap();
        assert_eq!(row.latest_applied, 1);
        assert!(row.applied);

        assert!(!log.mark_applied(&tit, &record("a", 0)).await.unwrap());
    }

    #[tokio::test]
    async fn record_older_than_applied_one_is_rejected() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(1, BTreeSet::new(), None).await.unwrap();
        let tit = log.create_empty_tit_row(&p).await.unwrap();
        log.append_redo_to_tit(&tit, &record("a", 5)).await.unwrap();
        log.advance_applied(&tit, 0).await.unwrap();

        let err = log.append_redo_to_tit(&tit, &record("a", 4)).await.unwrap_err();
        assert!(matches!(err, RedoLogError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn hand_off_chains_history() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(3, BTreeSet::new(), None).await.unwrap();
        let first = log.initialize_partition_history(&p, NodeId::new("a")).await.unwrap();
        assert_eq!(log.initialize_partition_history(&p, NodeId::new("a")).await.unwrap(), first);

        let (second, previous) = log.take_ownership(&p, NodeId::new("b")).await.unwrap();
        assert_eq!(previous, Some(first.clone()));
        assert_eq!(log.history_parents(&second).await.unwrap(), vec![first.clone()]);
        assert!(log.history_parents(&first).await.unwrap().is_empty());

        let info = log.partition_info(&p).await.unwrap();
        assert_eq!(info.owner, Some(NodeId::new("b")));
        assert_eq!(info.latest_tit, Some(second.clone()));
        assert_eq!(log.history_chain(&p).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn table_directory_records_previous_partitions() {
        let (log, _) = redo_log().await;
        let (p1, p2) = (PartitionId::new("p1"), PartitionId::new("p2"));
        log.create_table_to_partition_row("t", &p1).await.unwrap();
        log.create_table_to_partition_row("t", &p2).await.unwrap();

        log.update_table_to_partition("t", &p2).await.unwrap();
        let row = log.update_table_to_partition("t", &p2).await.unwrap();

        assert_eq!(row.partition, p2);
        assert_eq!(row.previous_partitions.into_iter().collect::<Vec<_>>(), vec![p1]);
    }

    #[tokio::test]
    async fn held_partition_lock_times_out_hand_off() {
        let (log, inner) = redo_log().await;
        let p = log.create_partition_info_row(1, BTreeSet::new(), None).await.unwrap();
        let held = inner
            .acquire_lock(&lock_resource(&log.tables().partition_info, p.as_str()))
            .await
            .unwrap();

        let err = log.take_ownership(&p, NodeId::new("b")).await.unwrap_err();
        assert!(matches!(err, RedoLogError::LockTimeout(_)));

        inner.release_lock(held).await.unwrap();
    }

    #[tokio::test]
    async fn owner_update_requires_the_partition_lock() {
        let (log, _) = redo_log().await;
        let p = log.create_partition_info_row(3, BTreeSet::new(), None).await.unwrap();
        let tit = log.create_empty_tit_row(&p).await.unwrap();

        log.update_owner_and_latest_tit(&p, NodeId::new("a"), tit.clone(), None)
            .await
            .unwrap();
        let info = log.partition_info(&p).await.unwrap();
        assert_eq!(info.owner, Some(NodeId::new("a")));
        assert_eq!(info.latest_tit, Some(tit.clone()));

        let stray = LockId::generate();
        let err = log
            .update_owner_and_latest_tit(&p, NodeId::new("b"), tit, Some(&stray))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RedoLogError::RemoteWriteFailure(StoreError::LockNotHeld { .. })
        ));
    }
}
