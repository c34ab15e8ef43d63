use crate::store::distributed::{
    lock_resource, DistributedStore, LockId, StoreError, StoreRead, StoreWrite, StoredRow, WriteMode,
};
use crate::store::local::{LocalConnectionId, LocalOutcome, LocalStatement, LocalStore, LocalStoreError};
use crate::store::row::{Row, RowKey, TableSchema};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;

// -- InMemoryLocalStore --

/// In-memory stand-in for the node's relational database.
///
/// All connections see each other's uncommitted writes. Each connection keeps an undo list so that
/// `rollback()` restores the rows it touched.
pub struct InMemoryLocalStore {
    state: Mutex<LocalState>,
}

struct LocalState {
    tables: HashMap<String, LocalTable>,
    connections: HashMap<LocalConnectionId, Vec<Undo>>,
    next_connection: u64,
}

struct LocalTable {
    schema: TableSchema,
    rows: BTreeMap<RowKey, Row>,
}

// Value of `key` before the connection first changed it.
struct Undo {
    table: String,
    key: RowKey,
    previous: Option<Row>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        InMemoryLocalStore {
            state: Mutex::new(LocalState {
                tables: HashMap::new(),
                connections: HashMap::new(),
                next_connection: 1,
            }),
        }
    }

    /// DDL is outside the replication protocol; tests and embedders create tables directly.
    pub fn create_table(&self, schema: TableSchema) {
        let mut state = self.lock();
        state
            .tables
            .entry(schema.table().to_string())
            .or_insert_with(|| LocalTable {
                schema,
                rows: BTreeMap::new(),
            });
    }

    /// Committed-or-not view of one row, bypassing connections.
    pub fn peek(&self, table: &str, key: &RowKey) -> Option<Row> {
        let state = self.lock();
        state.tables.get(table).and_then(|t| t.rows.get(key).cloned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().expect("InMemoryLocalStore mutex guard poison")
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalState {
    fn table_mut(&mut self, table: &str) -> Result<&mut LocalTable, LocalStoreError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| LocalStoreError::UnknownTable(table.to_string()))
    }

    fn record_undo(&mut self, conn: LocalConnectionId, table: &str, key: &RowKey) -> Result<(), LocalStoreError> {
        let previous = self
            .tables
            .get(table)
            .and_then(|t| t.rows.get(key).cloned());
        let undo_list = self
            .connections
            .get_mut(&conn)
            .ok_or(LocalStoreError::UnknownConnection(conn))?;
        undo_list.push(Undo {
            table: table.to_string(),
            key: key.clone(),
            previous,
        });
        Ok(())
    }

    fn undo_all(&mut self, conn: LocalConnectionId) -> Result<(), LocalStoreError> {
        let undo_list = self
            .connections
            .get_mut(&conn)
            .ok_or(LocalStoreError::UnknownConnection(conn))?;
        let undo_list = std::mem::take(undo_list);

        for undo in undo_list.into_iter().rev() {
            if let Some(table) = self.tables.get_mut(&undo.table) {
                match undo.previous {
                    Some(row) => {
                        table.rows.insert(undo.key, row);
                    }
                    None => {
                        table.rows.remove(&undo.key);
                    }
                }
            }
        }

        Ok(())
    }
}

impl LocalStore for InMemoryLocalStore {
    fn open_connection(&self) -> Result<LocalConnectionId, LocalStoreError> {
        let mut state = self.lock();
        let conn = LocalConnectionId::new(state.next_connection);
        state.next_connection += 1;
        state.connections.insert(conn, vec![]);
        Ok(conn)
    }

    fn close_connection(&self, conn: LocalConnectionId) {
        let mut state = self.lock();
        // Ignore unknown connection, closing is best effort.
        let _ = state.undo_all(conn);
        state.connections.remove(&conn);
    }

    fn table_schema(&self, table: &str) -> Result<TableSchema, LocalStoreError> {
        let state = self.lock();
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| LocalStoreError::UnknownTable(table.to_string()))
    }

    fn execute(&self, conn: LocalConnectionId, statement: LocalStatement) -> Result<LocalOutcome, LocalStoreError> {
        let mut state = self.lock();
        if !state.connections.contains_key(&conn) {
            return Err(LocalStoreError::UnknownConnection(conn));
        }

        match statement {
            LocalStatement::Insert { table, row } => {
                let key = state.table_mut(&table)?.schema.row_key(&row)?;
                if state.table_mut(&table)?.rows.contains_key(&key) {
                    return Err(LocalStoreError::DuplicateKey { table, key });
                }
                state.record_undo(conn, &table, &key)?;
                state.table_mut(&table)?.rows.insert(key, row);
                Ok(LocalOutcome::RowsAffected(1))
            }
            LocalStatement::Update { table, row } => {
                let key = state.table_mut(&table)?.schema.row_key(&row)?;
                if !state.table_mut(&table)?.rows.contains_key(&key) {
                    return Ok(LocalOutcome::RowsAffected(0));
                }
                state.record_undo(conn, &table, &key)?;
                state.table_mut(&table)?.rows.insert(key, row);
                Ok(LocalOutcome::RowsAffected(1))
            }
            LocalStatement::Delete { table, key } => {
                if !state.table_mut(&table)?.rows.contains_key(&key) {
                    return Ok(LocalOutcome::RowsAffected(0));
                }
                state.record_undo(conn, &table, &key)?;
                state.table_mut(&table)?.rows.remove(&key);
                Ok(LocalOutcome::RowsAffected(1))
            }
            LocalStatement::Select { table } => {
                let rows = state.table_mut(&table)?.rows.values().cloned().collect();
                Ok(LocalOutcome::Rows(rows))
            }
            LocalStatement::SelectKey { table, key } => {
                let rows = state.table_mut(&table)?.rows.get(&key).cloned().into_iter().collect();
                Ok(LocalOutcome::Rows(rows))
            }
        }
    }

    fn commit(&self, conn: LocalConnectionId) -> Result<(), LocalStoreError> {
        let mut state = self.lock();
        let undo_list = state
            .connections
            .get_mut(&conn)
            .ok_or(LocalStoreError::UnknownConnection(conn))?;
        undo_list.clear();
        Ok(())
    }

    fn rollback(&self, conn: LocalConnectionId) -> Result<(), LocalStoreError> {
        self.lock().undo_all(conn)
    }
}

// -- InMemoryDistributedStore --

/// In-memory model of the distributed store, shared by every node of a test cluster.
///
/// Supports fault injection so callers can exercise unavailability and stalled calls.
pub struct InMemoryDistributedStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Bytes>>>,
    locks: Mutex<LockTable>,
    lock_released: Notify,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct LockTable {
    holder_by_resource: HashMap<String, LockId>,
    resource_by_lock: HashMap<LockId, String>,
}

#[derive(Clone, Default)]
struct Faults {
    unavailable: bool,
    latency: Option<Duration>,
}

impl InMemoryDistributedStore {
    pub fn new() -> Self {
        InMemoryDistributedStore {
            tables: Mutex::new(HashMap::new()),
            locks: Mutex::new(LockTable::default()),
            lock_released: Notify::new(),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// While set, every read and write fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().expect("faults mutex guard poison").unavailable = unavailable;
    }

    /// Delay applied to every read and write, to simulate a stalled network.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().expect("faults mutex guard poison").latency = latency;
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.lock_tables().contains_key(table)
    }

    /// Direct view of a stored value, bypassing faults.
    pub fn peek(&self, table: &str, key: &str) -> Option<Bytes> {
        self.lock_tables().get(table).and_then(|t| t.get(key).cloned())
    }

    pub fn keys(&self, table: &str) -> Vec<String> {
        self.lock_tables()
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_locked(&self, resource: &str) -> bool {
        self.lock_locks().holder_by_resource.contains_key(resource)
    }

    async fn inject_faults(&self) -> Result<(), StoreError> {
        let faults = self.faults.lock().expect("faults mutex guard poison").clone();
        if let Some(latency) = faults.latency {
            tokio::time::sleep(latency).await;
        }
        if faults.unavailable {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn try_acquire(&self, resource: &str) -> Option<LockId> {
        let mut locks = self.lock_locks();
        if locks.holder_by_resource.contains_key(resource) {
            return None;
        }

        let lock = LockId::generate();
        locks.holder_by_resource.insert(resource.to_string(), lock.clone());
        locks.resource_by_lock.insert(lock.clone(), resource.to_string());
        Some(lock)
    }

    fn release(&self, lock: &LockId) -> Result<(), StoreError> {
        {
            let mut locks = self.lock_locks();
            let resource = locks
                .resource_by_lock
                .remove(lock)
                .ok_or_else(|| StoreError::UnknownLock(lock.clone()))?;
            locks.holder_by_resource.remove(&resource);
        }
        self.lock_released.notify_waiters();
        Ok(())
    }

    fn check_holder(&self, lock: &LockId, resource: &str) -> Result<(), StoreError> {
        let locks = self.lock_locks();
        match locks.holder_by_resource.get(resource) {
            Some(holder) if holder == lock => Ok(()),
            _ => Err(StoreError::LockNotHeld {
                lock: lock.clone(),
                resource: resource.to_string(),
            }),
        }
    }

    fn apply(&self, write: StoreWrite) -> Result<(), StoreError> {
        let mut tables = self.lock_tables();
        let table = tables
            .get_mut(write.table())
            .ok_or_else(|| StoreError::UnknownTable(write.table().to_string()))?;

        match write {
            StoreWrite::Put { key, value, .. } => {
                table.insert(key, value);
            }
            StoreWrite::Insert {
                table: table_name,
                key,
                value,
            } => {
                if table.contains_key(&key) {
                    return Err(StoreError::KeyExists { table: table_name, key });
                }
                table.insert(key, value);
            }
            StoreWrite::Delete { key, .. } => {
                table.remove(&key);
            }
        }

        Ok(())
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Bytes>>> {
        self.tables.lock().expect("tables mutex guard poison")
    }

    fn lock_locks(&self) -> std::sync::MutexGuard<'_, LockTable> {
        self.locks.lock().expect("locks mutex guard poison")
    }
}

impl Default for InMemoryDistributedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DistributedStore for InMemoryDistributedStore {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.inject_faults().await?;
        self.lock_tables().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn write(&self, write: StoreWrite, mode: WriteMode) -> Result<(), StoreError> {
        self.inject_faults().await?;
        let resource = lock_resource(write.table(), write.key());

        match mode {
            WriteMode::Eventual => self.apply(write),
            WriteMode::Critical(Some(lock)) => {
                self.check_holder(&lock, &resource)?;
                self.apply(write)
            }
            WriteMode::Critical(None) => {
                let lock = self.acquire_lock(&resource).await?;
                let result = self.apply(write);
                self.release(&lock)?;
                result
            }
        }
    }

    async fn read(&self, read: StoreRead) -> Result<Vec<StoredRow>, StoreError> {
        self.inject_faults().await?;
        let tables = self.lock_tables();

        match read {
            StoreRead::Key { table, key } => {
                let rows = tables.get(&table).ok_or(StoreError::UnknownTable(table))?;
                Ok(rows.get(&key).map(|v| (key, v.clone())).into_iter().collect())
            }
            StoreRead::Table { table } => {
                let rows = tables.get(&table).ok_or(StoreError::UnknownTable(table))?;
                Ok(rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
        }
    }

    async fn acquire_lock(&self, resource: &str) -> Result<LockId, StoreError> {
        loop {
            // Created before the check so a release between the check and the await still wakes us.
            let released = self.lock_released.notified();
            if let Some(lock) = self.try_acquire(resource) {
                return Ok(lock);
            }
            released.await;
        }
    }

    async fn release_lock(&self, lock: LockId) -> Result<(), StoreError> {
        self.release(&lock)
    }
}
