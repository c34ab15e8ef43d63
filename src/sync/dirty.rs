use crate::ids::NodeId;
use crate::staging::Operation;
use crate::store::{
    upsert, ColumnCountMismatch, LocalConnectionId, LocalStatement, LocalStore, LocalStoreError, RemoteStore, Row,
    RowKey, StoreError, StoreRead, StoreWrite, TableSchema, WriteMode,
};
use bytes::Bytes;

/// What a committed write did to one row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MirrorChange {
    Upsert(Row),
    Delete,
}

impl From<&Operation> for MirrorChange {
    fn from(op: &Operation) -> Self {
        match &op.new_value {
            Some(row) => MirrorChange::Upsert(row.clone()),
            None => MirrorChange::Delete,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RepairReport {
    pub repaired: usize,
    pub deleted: usize,
    /// The distributed store could not be reached. Local data may be stale and markers are kept.
    pub degraded: bool,
}

/// DirtySync keeps the distributed mirror of every table and the per-replica dirty markers.
///
/// Every replica has its own dirty table per mirrored table. A writer marks a key dirty for all
/// replicas but itself; a reader repairs its own dirty keys from the mirror before answering.
pub struct DirtySync {
    logger: slog::Logger,
    store: RemoteStore,
    namespace: String,
    me: NodeId,
    replicas: Vec<NodeId>,
}

impl DirtySync {
    pub fn new(logger: slog::Logger, store: RemoteStore, namespace: String, me: NodeId, replicas: Vec<NodeId>) -> Self {
        DirtySync {
            logger,
            store,
            namespace,
            me,
            replicas,
        }
    }

    pub fn mirror_table(&self, table: &str) -> String {
        format!("{}.{}", self.namespace, table)
    }

    pub fn dirty_table(&self, table: &str, replica: &NodeId) -> String {
        format!("{}.dirty_{}_{}", self.namespace, table, replica)
    }

    /// Creates the mirror table and one dirty table per replica. Idempotent.
    pub async fn register_table(&self, schema: &TableSchema) -> Result<(), SyncError> {
        self.store.create_table(&self.mirror_table(schema.table())).await?;
        for replica in &self.replicas {
            self.store.create_table(&self.dirty_table(schema.table(), replica)).await?;
        }
        Ok(())
    }

    /// Writes the change into the mirror, then marks the key dirty for every other replica.
    ///
    /// The two steps are not atomic. A failure after the mirror write leaves the mirror ahead of
    /// the markers, and retrying is safe.
    pub async fn mirror_write(&self, schema: &TableSchema, key: &RowKey, change: &MirrorChange) -> Result<(), SyncError> {
        let table = schema.table();
        let write = match change {
            MirrorChange::Upsert(row) => {
                schema.check_row(row)?;
                StoreWrite::Put {
                    table: self.mirror_table(table),
                    key: key.as_str().to_string(),
                    value: Bytes::from(serde_json::to_vec(row)?),
                }
            }
            MirrorChange::Delete => StoreWrite::Delete {
                table: self.mirror_table(table),
                key: key.as_str().to_string(),
            },
        };
        self.store.write(write, WriteMode::Eventual).await?;

        for replica in self.replicas.iter().filter(|r| **r != self.me) {
            let marker = StoreWrite::Put {
                table: self.dirty_table(table, replica),
                key: key.as_str().to_string(),
                value: Bytes::new(),
            };
            self.store.write(marker, WriteMode::Eventual).await?;
        }
        Ok(())
    }

    pub async fn dirty_keys(&self, table: &str, replica: &NodeId) -> Result<Vec<RowKey>, SyncError> {
        let read = StoreRead::Table {
            table: self.dirty_table(table, replica),
        };
        Ok(self
            .store
            .read(read)
            .await?
            .into_iter()
            .map(|(key, _)| RowKey::new(key))
            .collect())
    }

    pub async fn mirrored_row(&self, table: &str, key: &RowKey) -> Result<Option<Row>, SyncError> {
        let read = StoreRead::Key {
            table: self.mirror_table(table),
            key: key.as_str().to_string(),
        };
        match self.store.read(read).await?.into_iter().next() {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Brings this node's copy of `table` up to date with the mirror for every key marked dirty for
    /// this node. Unreachable store: serve stale data, keep markers.
    pub async fn repair(&self, local: &dyn LocalStore, table: &str) -> Result<RepairReport, SyncError> {
        match self.try_repair(local, table).await {
            Err(SyncError::RemoteWriteFailure(e)) if e.is_unreachable() => {
                slog::warn!(
                    self.logger,
                    "Read repair of {} skipped, serving local data: {}",
                    table,
                    e
                );
                Ok(RepairReport {
                    degraded: true,
                    ..RepairReport::default()
                })
            }
            other => other,
        }
    }

    async fn try_repair(&self, local: &dyn LocalStore, table: &str) -> Result<RepairReport, SyncError> {
        let keys = self.dirty_keys(table, &self.me).await?;
        if keys.is_empty() {
            return Ok(RepairReport::default());
        }

        let schema = local.table_schema(table)?;
        let mut fetched = Vec::with_capacity(keys.len());
        for key in &keys {
            let row = self.mirrored_row(table, key).await?;
            if let Some(row) = &row {
                schema.check_row(row)?;
            }
            fetched.push((key.clone(), row));
        }

        let conn = local.open_connection()?;
        let applied = Self::apply_locally(local, conn, table, fetched);
        if applied.is_err() {
            let _ = local.rollback(conn);
        }
        local.close_connection(conn);
        let (repaired, deleted) = applied?;

        for key in &keys {
            let clear = StoreWrite::Delete {
                table: self.dirty_table(table, &self.me),
                key: key.as_str().to_string(),
            };
            self.store.write(clear, WriteMode::Eventual).await?;
        }

        slog::debug!(
            self.logger,
            "Repaired {}: {} rows updated, {} deleted",
            table,
            repaired,
            deleted
        );
        Ok(RepairReport {
            repaired,
            deleted,
            degraded: false,
        })
    }

    fn apply_locally(
        local: &dyn LocalStore,
        conn: LocalConnectionId,
        table: &str,
        rows: Vec<(RowKey, Option<Row>)>,
    ) -> Result<(usize, usize), LocalStoreError> {
        let (mut repaired, mut deleted) = (0, 0);
        for (key, row) in rows {
            match row {
                Some(row) => {
                    upsert(local, conn, table, row)?;
                    repaired += 1;
                }
                None => {
                    let delete = LocalStatement::Delete {
                        table: table.to_string(),
                        key,
                    };
                    local.execute(conn, delete)?;
                    deleted += 1;
                }
            }
        }
        local.commit(conn)?;
        Ok((repaired, deleted))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Row does not match table schema")]
    SchemaMismatch(#[from] ColumnCountMismatch),

    #[error("Distributed store write or read failed")]
    RemoteWriteFailure(#[source] StoreError),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Local store failure")]
    Local(#[from] LocalStoreError),

    #[error("Corrupt mirrored row")]
    Corrupt(#[from] serde_json::Error),
}

// ------- Conversions --------

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout(resource) => SyncError::LockTimeout(resource),
            other => SyncError::RemoteWriteFailure(other),
        }
    }
}
