use crate::ids::{CommitId, PartitionId, RedoRecordId, TxId};
use crate::store::LocalConnectionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Where a transaction is in the two-sided commit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommitState {
    Open,
    CommitRequested,
    LocalDone,
    RemoteDone,
    Complete,
}

/// CommitProgress is the per-transaction record that makes a commit resumable.
///
/// Flag setters are CAS-like: they return true iff they changed state. Setting a flag twice is a
/// no-op, and local/remote completion can arrive in either order.
#[derive(Clone, Debug)]
pub(crate) struct CommitProgress {
    tx_id: TxId,
    commit_id: Option<CommitId>,
    commit_requested: bool,
    local_done: bool,
    remote_done: bool,
    connection: LocalConnectionId,
    redo_record_ids: HashMap<PartitionId, RedoRecordId>,
    last_update: DateTime<Utc>,
}

impl CommitProgress {
    pub(crate) fn new(tx_id: TxId, connection: LocalConnectionId) -> Self {
        CommitProgress {
            tx_id,
            commit_id: None,
            commit_requested: false,
            local_done: false,
            remote_done: false,
            connection,
            redo_record_ids: HashMap::new(),
            last_update: Utc::now(),
        }
    }

    pub(crate) fn tx_id(&self) -> &TxId {
        &self.tx_id
    }

    pub(crate) fn commit_id(&self) -> Option<CommitId> {
        self.commit_id
    }

    /// CAS: only assigns if no commit id is assigned yet.
    pub(crate) fn assign_commit_id_if_unassigned(&mut self, commit_id: CommitId) -> bool {
        if self.commit_id.is_some() {
            return false;
        }
        self.commit_id = Some(commit_id);
        self.touch();
        true
    }

    pub(crate) fn mark_commit_requested(&mut self) -> bool {
        Self::set_flag(&mut self.commit_requested, &mut self.last_update)
    }

    pub(crate) fn mark_local_done(&mut self) -> bool {
        Self::set_flag(&mut self.local_done, &mut self.last_update)
    }

    pub(crate) fn mark_remote_done(&mut self) -> bool {
        Self::set_flag(&mut self.remote_done, &mut self.last_update)
    }

    pub(crate) fn is_commit_requested(&self) -> bool {
        self.commit_requested
    }

    pub(crate) fn is_local_done(&self) -> bool {
        self.local_done
    }

    pub(crate) fn is_remote_done(&self) -> bool {
        self.remote_done
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.commit_requested && self.local_done && self.remote_done
    }

    pub(crate) fn state(&self) -> CommitState {
        match (self.commit_requested, self.local_done, self.remote_done) {
            (false, _, _) => CommitState::Open,
            (true, true, true) => CommitState::Complete,
            (true, true, false) => CommitState::LocalDone,
            (true, false, true) => CommitState::RemoteDone,
            (true, false, false) => CommitState::CommitRequested,
        }
    }

    pub(crate) fn connection(&self) -> LocalConnectionId {
        self.connection
    }

    pub(crate) fn set_redo_record_id(&mut self, partition: PartitionId, record_id: RedoRecordId) {
        self.redo_record_ids.insert(partition, record_id);
        self.touch();
    }

    pub(crate) fn redo_record_id(&self, partition: &PartitionId) -> Option<&RedoRecordId> {
        self.redo_record_ids.get(partition)
    }

    pub(crate) fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Back to `Open`, keeping the transaction id and connection.
    pub(crate) fn reset(&mut self) {
        self.commit_id = None;
        self.commit_requested = false;
        self.local_done = false;
        self.remote_done = false;
        self.redo_record_ids.clear();
        self.touch();
    }

    fn set_flag(flag: &mut bool, last_update: &mut DateTime<Utc>) -> bool {
        if *flag {
            return false;
        }
        *flag = true;
        *last_update = Utc::now();
        true
    }

    fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}
