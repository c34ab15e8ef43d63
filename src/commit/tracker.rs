use crate::commit::progress::{CommitProgress, CommitState};
use crate::ids::{CommitId, PartitionId, RedoRecordId, TxId};
use crate::store::LocalConnectionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// TxCommitTracker coordinates the local and distributed halves of every transaction's commit.
///
/// The map lock is held only to find an entry. All flag mutation happens under the entry's own
/// mutex, so unrelated transactions never contend.
pub struct TxCommitTracker {
    logger: slog::Logger,
    next_commit_id: AtomicU64,
    transactions: RwLock<HashMap<TxId, Arc<Mutex<CommitProgress>>>>,
}

impl TxCommitTracker {
    pub fn new(logger: slog::Logger) -> Self {
        TxCommitTracker {
            logger,
            next_commit_id: AtomicU64::new(1),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_tracker(&self, tx_id: TxId, connection: LocalConnectionId) {
        let progress = Arc::new(Mutex::new(CommitProgress::new(tx_id.clone(), connection)));
        let previous = self
            .transactions
            .write()
            .expect("TxCommitTracker map lock poison")
            .insert(tx_id.clone(), progress);
        if let Some(previous) = previous {
            let previous = Self::lock(&previous);
            slog::warn!(
                self.logger,
                "Replaced existing commit tracker for {} in state {:?}",
                previous.tx_id(),
                previous.state()
            );
        }
    }

    pub fn contains(&self, tx_id: &TxId) -> bool {
        self.transactions
            .read()
            .expect("TxCommitTracker map lock poison")
            .contains_key(tx_id)
    }

    /// Exactly one commit id per transaction, no matter how many callers race here.
    pub fn get_or_assign_commit_id(&self, tx_id: &TxId) -> Result<CommitId, TrackerError> {
        let entry = self.entry(tx_id)?;
        let mut progress = Self::lock(&entry);
        if let Some(commit_id) = progress.commit_id() {
            return Ok(commit_id);
        }

        let commit_id = CommitId::new(self.next_commit_id.fetch_add(1, Ordering::SeqCst));
        progress.assign_commit_id_if_unassigned(commit_id);
        Ok(commit_id)
    }

    pub fn commit_id(&self, tx_id: &TxId) -> Result<Option<CommitId>, TrackerError> {
        self.with_entry(tx_id, |p| p.commit_id())
    }

    pub fn mark_commit_requested(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry_mut(tx_id, |p| p.mark_commit_requested())
    }

    pub fn mark_local_done(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry_mut(tx_id, |p| p.mark_local_done())
    }

    pub fn mark_remote_done(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry_mut(tx_id, |p| p.mark_remote_done())
    }

    pub fn is_commit_requested(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry(tx_id, |p| p.is_commit_requested())
    }

    pub fn is_local_done(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry(tx_id, |p| p.is_local_done())
    }

    pub fn is_remote_done(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry(tx_id, |p| p.is_remote_done())
    }

    pub fn is_complete(&self, tx_id: &TxId) -> Result<bool, TrackerError> {
        self.with_entry(tx_id, |p| p.is_complete())
    }

    pub fn state(&self, tx_id: &TxId) -> Result<CommitState, TrackerError> {
        self.with_entry(tx_id, |p| p.state())
    }

    pub fn set_redo_record_id(
        &self,
        tx_id: &TxId,
        partition: PartitionId,
        record_id: RedoRecordId,
    ) -> Result<(), TrackerError> {
        self.with_entry_mut(tx_id, |p| p.set_redo_record_id(partition, record_id))
    }

    /// Assigns `make_id()` to the partition unless a record id is already assigned, and returns the
    /// partition's record id either way.
    pub(crate) fn get_or_assign_redo_record_id<F>(
        &self,
        tx_id: &TxId,
        partition: &PartitionId,
        make_id: F,
    ) -> Result<RedoRecordId, TrackerError>
    where
        F: FnOnce() -> RedoRecordId,
    {
        self.with_entry_mut(tx_id, |p| {
            if let Some(record_id) = p.redo_record_id(partition).cloned() {
                return record_id;
            }
            let record_id = make_id();
            p.set_redo_record_id(partition.clone(), record_id.clone());
            record_id
        })
    }

    pub fn redo_record_id(&self, tx_id: &TxId, partition: &PartitionId) -> Result<Option<RedoRecordId>, TrackerError> {
        self.with_entry(tx_id, |p| p.redo_record_id(partition).cloned())
    }

    pub fn is_redo_record_assigned(&self, tx_id: &TxId, partition: &PartitionId) -> Result<bool, TrackerError> {
        self.with_entry(tx_id, |p| p.redo_record_id(partition).is_some())
    }

    pub fn connection(&self, tx_id: &TxId) -> Result<LocalConnectionId, TrackerError> {
        self.with_entry(tx_id, |p| p.connection())
    }

    pub fn last_update(&self, tx_id: &TxId) -> Result<DateTime<Utc>, TrackerError> {
        self.with_entry(tx_id, |p| p.last_update())
    }

    /// Reuse a completed tracker for the transaction's next unit of work.
    pub fn reinitialize(&self, tx_id: &TxId) -> Result<(), TrackerError> {
        let entry = self.entry(tx_id)?;
        let mut progress = Self::lock(&entry);
        if !progress.is_complete() {
            return Err(TrackerError::NotComplete(progress.tx_id().clone()));
        }

        progress.reset();
        slog::debug!(self.logger, "Reinitialized commit tracker for {}", progress.tx_id());
        Ok(())
    }

    pub fn delete_tracker(&self, tx_id: &TxId) -> Result<(), TrackerError> {
        self.transactions
            .write()
            .expect("TxCommitTracker map lock poison")
            .remove(tx_id)
            .map(|_| ())
            .ok_or_else(|| TrackerError::UnknownTransaction(tx_id.clone()))
    }

    fn entry(&self, tx_id: &TxId) -> Result<Arc<Mutex<CommitProgress>>, TrackerError> {
        self.transactions
            .read()
            .expect("TxCommitTracker map lock poison")
            .get(tx_id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownTransaction(tx_id.clone()))
    }

    fn with_entry<T>(&self, tx_id: &TxId, f: impl FnOnce(&CommitProgress) -> T) -> Result<T, TrackerError> {
        let entry = self.entry(tx_id)?;
        let progress = Self::lock(&entry);
        Ok(f(&*progress))
    }

    fn with_entry_mut<T>(&self, tx_id: &TxId, f: impl FnOnce(&mut CommitProgress) -> T) -> Result<T, TrackerError> {
        let entry = self.entry(tx_id)?;
        let mut progress = Self::lock(&entry);
        Ok(f(&mut *progress))
    }

    fn lock(entry: &Arc<Mutex<CommitProgress>>) -> std::sync::MutexGuard<'_, CommitProgress> {
        entry.lock().expect("CommitProgress mutex guard poison")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxId),

    #[error("Transaction {0} has not completed its commit")]
    NotComplete(TxId),
}
