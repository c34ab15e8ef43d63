use crate::api::options::NodeOptionsValidated;
use crate::api::session::{Session, SessionError};
use crate::commit::{TrackerError, TxCommitTracker};
use crate::ids::{NodeId, PartitionId, TitId, TxId};
use crate::partition::{PartitionConfiguration, PartitionError, PartitionModel, PartitionSnapshot};
use crate::redolog::{replay_partition, Lease, RedoLog, RedoLogError, ReplayReport};
use crate::staging::StagingTable;
use crate::store::{LocalStore, LocalStoreError, TableSchema};
use crate::sync::{DirtySync, SyncError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything a node's sessions share. One per node; there is no process-wide state.
pub(crate) struct NodeContext {
    pub logger: slog::Logger,
    pub me: NodeId,
    pub local: Arc<dyn LocalStore>,
    pub redo_log: RedoLog,
    pub dirty: DirtySync,
    pub model: PartitionModel,
    pub tracker: TxCommitTracker,
    pub lease: Lease,
    pub options: NodeOptionsValidated,
    pub shutdown: CancellationToken,
    // Outlives a dropped session. Reopening the session resumes its commit.
    pub staging: Mutex<HashMap<TxId, Arc<StagingTable>>>,
}

impl NodeContext {
    pub(crate) fn staging_for(&self, tx_id: &TxId) -> Arc<StagingTable> {
        self.staging
            .lock()
            .expect("staging map mutex guard poison")
            .entry(tx_id.clone())
            .or_insert_with(|| Arc::new(StagingTable::new()))
            .clone()
    }

    pub(crate) fn forget_staging(&self, tx_id: &TxId) {
        self.staging.lock().expect("staging map mutex guard poison").remove(tx_id);
    }
}

/// MirrorNode is one replica of the mirrored database: a local relational copy kept in sync with
/// the other replicas through the distributed store.
#[derive(Clone)]
pub struct MirrorNode {
    ctx: Arc<NodeContext>,
}

impl MirrorNode {
    pub(crate) fn new(ctx: NodeContext) -> Self {
        MirrorNode { ctx: Arc::new(ctx) }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.ctx.me
    }

    /// Opens the session for `tx_id`. A session id whose last commit completed is reused in place,
    /// and one with an unfinished commit picks up its connection and staged writes so the commit
    /// can be retried.
    pub fn open_session(&self, tx_id: TxId) -> Result<Session, SessionError> {
        let ctx = &self.ctx;
        let connection = if ctx.tracker.contains(&tx_id) {
            if ctx.tracker.is_complete(&tx_id)? {
                ctx.tracker.reinitialize(&tx_id)?;
            }
            ctx.tracker.connection(&tx_id)?
        } else {
            let connection = ctx.local.open_connection()?;
            ctx.tracker.create_tracker(tx_id.clone(), connection);
            connection
        };

        let staging = ctx.staging_for(&tx_id);
        Ok(Session::new(self.ctx.clone(), tx_id, connection, staging))
    }

    /// Makes `schema`'s table replicated: creates its mirror and dirty tables and records which
    /// partition owns it. A table nobody owns yet goes to the first partition this node owns.
    pub async fn register_table(&self, schema: &TableSchema) -> Result<PartitionId, NodeError> {
        let ctx = &self.ctx;
        let table = schema.table();

        let owner = match ctx.model.owner_of(table) {
            Some(owner) => owner,
            None => ctx
                .model
                .owned_by(&ctx.me)
                .into_iter()
                .next()
                .ok_or_else(|| NodeError::NoOwnedPartition(table.to_string()))?,
        };

        ctx.dirty.register_table(schema).await?;
        let owner = ctx.model.assign_table_if_unowned(table, &owner)?;
        ctx.redo_log.create_table_to_partition_row(table, &owner).await?;

        slog::info!(ctx.logger, "Registered table {} in partition {}", table, owner);
        Ok(owner)
    }

    /// Makes this node the owner of `partition`, starting a new TIT row chained after the previous
    /// owner's.
    pub async fn take_ownership(&self, partition: &PartitionId) -> Result<TitId, NodeError> {
        let ctx = &self.ctx;
        let (tit, _previous) = ctx.redo_log.take_ownership(partition, ctx.me.clone()).await?;
        ctx.model.set_partition_owner(partition, ctx.me.clone())?;
        ctx.model.set_latest_tit(partition, tit.clone())?;
        Ok(tit)
    }

    /// Moves `table` to `partition`. Returns the partition that owned it before, if it moved.
    ///
    /// The table directory row is updated first; the model only changes once that succeeded.
    pub async fn reassign_table(&self, table: &str, partition: &PartitionId) -> Result<Option<PartitionId>, NodeError> {
        let ctx = &self.ctx;
        if ctx.model.partition(partition).is_none() {
            return Err(PartitionError::partition_not_found(partition).into());
        }
        let current = ctx
            .model
            .owner_of(table)
            .ok_or_else(|| PartitionError::table_not_found(table))?;
        if &current == partition {
            return Ok(None);
        }

        ctx.redo_log.create_table_to_partition_row(table, &current).await?;
        ctx.redo_log.update_table_to_partition(table, partition).await?;
        let previous = ctx.model.reassign_owner(table, partition)?;
        slog::info!(ctx.logger, "Moved table {} from {} to {}", table, current, partition);
        Ok(previous)
    }

    /// Applies the partition's unapplied redo records to this node's local store. The TIT rows'
    /// applied cursors track the owner's store, so only the owner may replay.
    pub async fn replay_partition(&self, partition: &PartitionId) -> Result<ReplayReport, NodeError> {
        let ctx = &self.ctx;
        let owner = ctx.redo_log.partition_info(partition).await?.owner;
        if owner.as_ref() != Some(&ctx.me) {
            return Err(NodeError::NotOwner {
                partition: partition.clone(),
                owner,
            });
        }

        Ok(replay_partition(
            &ctx.logger,
            &ctx.redo_log,
            ctx.local.as_ref(),
            partition,
            ctx.options.replay_batch_size,
        )
        .await?)
    }

    pub fn partitions(&self) -> PartitionSnapshot {
        self.ctx.model.snapshot()
    }

    /// Current assignment, in the shape of the partition configuration file.
    pub fn partition_configuration(&self) -> PartitionConfiguration {
        PartitionConfiguration::from_model(self.ctx.me.clone(), &self.ctx.model)
    }

    pub fn tracker(&self) -> &TxCommitTracker {
        &self.ctx.tracker
    }

    pub fn redo_log(&self) -> &RedoLog {
        &self.ctx.redo_log
    }

    pub fn dirty_sync(&self) -> &DirtySync {
        &self.ctx.dirty
    }

    /// Aborts in-flight distributed calls. Sessions fail fast afterwards.
    pub fn shutdown(&self) {
        slog::info!(self.ctx.logger, "Shutting down node {}", self.ctx.me);
        self.ctx.shutdown.cancel();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node owns no partition to place table {0} in")]
    NoOwnedPartition(String),

    #[error("Partition {partition} is owned by {owner:?}, not this node")]
    NotOwner {
        partition: PartitionId,
        owner: Option<NodeId>,
    },

    #[error("Partition model rejected the change")]
    Partition(#[from] PartitionError),

    #[error("Redo log operation failed")]
    RedoLog(#[from] RedoLogError),

    #[error("Mirror operation failed")]
    Sync(#[from] SyncError),

    #[error("Local store failure")]
    Local(#[from] LocalStoreError),

    #[error("Commit tracker failure")]
    Tracker(#[from] TrackerError),
}
