use crate::api::commit::{drive_commit, CommitError, CommitOutcome};
use crate::api::node::NodeContext;
use crate::commit::TrackerError;
use crate::ids::TxId;
use crate::staging::{OperationType, StagedKey, StagingTable};
use crate::store::{ColumnCountMismatch, LocalConnectionId, LocalStatement, LocalStoreError, Row, RowKey};
use crate::sync::{MirrorChange, RepairReport, SyncError};
use std::sync::Arc;

/// A client connection to the node. Writes go to the local store on the session's connection;
/// in autocommit mode each one is committed and mirrored at once, otherwise it is staged until
/// `commit()`. Once a commit has started, writes are refused until it completes.
pub struct Session {
    ctx: Arc<NodeContext>,
    logger: slog::Logger,
    tx_id: TxId,
    connection: LocalConnectionId,
    autocommit: bool,
    staging: Arc<StagingTable>,
}

impl Session {
    pub(crate) fn new(
        ctx: Arc<NodeContext>,
        tx_id: TxId,
        connection: LocalConnectionId,
        staging: Arc<StagingTable>,
    ) -> Self {
        let logger = ctx.logger.new(slog::o!("tx" => tx_id.to_string()));
        Session {
            ctx,
            logger,
            tx_id,
            connection,
            autocommit: false,
            staging,
        }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_id
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    pub async fn insert(&self, table: &str, row: Row) -> Result<(), SessionError> {
        self.check_no_commit_in_progress()?;
        let key = self.ctx.local.table_schema(table)?.row_key(&row)?;
        let insert = LocalStatement::Insert {
            table: table.to_string(),
            row: row.clone(),
        };
        self.ctx.local.execute(self.connection, insert)?;

        let key = StagedKey::new(table, key);
        self.after_write(key, OperationType::Insert, None, Some(row)).await
    }

    /// Replaces the row with the same key. Returns the number of rows affected.
    pub async fn update(&self, table: &str, row: Row) -> Result<usize, SessionError> {
        self.check_no_commit_in_progress()?;
        let key = self.ctx.local.table_schema(table)?.row_key(&row)?;
        let old = self.select_local(table, &key)?;
        let update = LocalStatement::Update {
            table: table.to_string(),
            row: row.clone(),
        };
        let affected = self.ctx.local.execute(self.connection, update)?.rows_affected();
        if affected == 0 {
            return Ok(0);
        }

        let key = StagedKey::new(table, key);
        self.after_write(key, OperationType::Update, old, Some(row)).await?;
        Ok(affected)
    }

    /// Returns the number of rows affected.
    pub async fn delete(&self, table: &str, key: RowKey) -> Result<usize, SessionError> {
        self.check_no_commit_in_progress()?;
        let old = self.select_local(table, &key)?;
        let delete = LocalStatement::Delete {
            table: table.to_string(),
            key: key.clone(),
        };
        let affected = self.ctx.local.execute(self.connection, delete)?.rows_affected();
        if affected == 0 {
            return Ok(0);
        }

        let key = StagedKey::new(table, key);
        self.after_write(key, OperationType::Delete, old, None).await?;
        Ok(affected)
    }

    /// Rows of `table`, after repairing the keys other replicas changed.
    pub async fn select(&self, table: &str) -> Result<Vec<Row>, SessionError> {
        self.repair(table).await?;
        let select = LocalStatement::Select {
            table: table.to_string(),
        };
        Ok(self.ctx.local.execute(self.connection, select)?.into_rows())
    }

    pub async fn select_key(&self, table: &str, key: &RowKey) -> Result<Option<Row>, SessionError> {
        self.repair(table).await?;
        self.select_local(table, key)
    }

    /// Switching autocommit on commits whatever is staged.
    pub async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), SessionError> {
        if autocommit && !self.autocommit && !self.staging.is_empty() {
            self.commit().await?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    pub async fn commit(&self) -> Result<CommitOutcome, SessionError> {
        Ok(drive_commit(&self.ctx, &self.logger, &self.tx_id, &self.staging).await?)
    }

    /// Undoes the local transaction and drops the staged write set. Nothing reaches the
    /// distributed store.
    pub fn rollback(&self) -> Result<(), SessionError> {
        self.check_no_commit_in_progress()?;
        self.ctx.local.rollback(self.connection)?;
        self.staging.discard();
        Ok(())
    }

    /// Rolls back anything staged and releases the session's connection and tracker. A session
    /// whose commit is unfinished stays open so that the commit can be resumed.
    pub fn close(self) -> Result<(), SessionError> {
        self.check_no_commit_in_progress()?;
        if !self.staging.is_empty() {
            self.rollback()?;
        }
        self.ctx.local.close_connection(self.connection);
        self.ctx.tracker.delete_tracker(&self.tx_id)?;
        self.ctx.forget_staging(&self.tx_id);
        Ok(())
    }

    async fn after_write(
        &self,
        key: StagedKey,
        op_type: OperationType,
        old_value: Option<Row>,
        new_value: Option<Row>,
    ) -> Result<(), SessionError> {
        if !self.autocommit {
            self.staging.record(key, op_type, old_value, new_value);
            return Ok(());
        }

        self.ctx.local.commit(self.connection)?;
        let schema = self.ctx.local.table_schema(&key.table)?;
        let change = match new_value {
            Some(row) => MirrorChange::Upsert(row),
            None => MirrorChange::Delete,
        };
        self.ctx.dirty.mirror_write(&schema, &key.key, &change).await?;
        Ok(())
    }

    async fn repair(&self, table: &str) -> Result<RepairReport, SessionError> {
        let report = self.ctx.dirty.repair(self.ctx.local.as_ref(), table).await?;
        if report.degraded {
            slog::warn!(self.logger, "Serving possibly stale rows of {}", table);
        }
        Ok(report)
    }

    fn select_local(&self, table: &str, key: &RowKey) -> Result<Option<Row>, SessionError> {
        let select = LocalStatement::SelectKey {
            table: table.to_string(),
            key: key.clone(),
        };
        Ok(self
            .ctx
            .local
            .execute(self.connection, select)?
            .into_rows()
            .into_iter()
            .next())
    }

    fn check_no_commit_in_progress(&self) -> Result<(), SessionError> {
        if self.ctx.tracker.is_commit_requested(&self.tx_id)? {
            return Err(SessionError::CommitInProgress(self.tx_id.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Commit of {0} has started and must be retried to completion")]
    CommitInProgress(TxId),

    #[error("Row does not match table schema")]
    SchemaMismatch(#[from] ColumnCountMismatch),

    #[error("Local store failure")]
    Local(#[from] LocalStoreError),

    #[error("Mirror operation failed")]
    Sync(#[from] SyncError),

    #[error("Commit tracker failure")]
    Tracker(#[from] TrackerError),

    #[error("Commit failed")]
    Commit(#[from] CommitError),
}
