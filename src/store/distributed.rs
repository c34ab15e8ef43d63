use crate::ids::random_id;
use bytes::Bytes;
use std::fmt;

/// Id of a held distributed lock.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct LockId(String);

impl LockId {
    pub(crate) fn generate() -> Self {
        LockId(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock-{}", self.0)
    }
}

/// Lock resource name guarding one key of one table.
pub fn lock_resource(table: &str, key: &str) -> String {
    format!("{}.{}", table, key)
}

#[derive(Clone, Debug)]
pub enum StoreWrite {
    /// Insert or overwrite.
    Put { table: String, key: String, value: Bytes },
    /// Insert only if absent; fails with `StoreError::KeyExists` otherwise.
    Insert { table: String, key: String, value: Bytes },
    Delete { table: String, key: String },
}

impl StoreWrite {
    pub fn table(&self) -> &str {
        match self {
            StoreWrite::Put { table, .. } => table,
            StoreWrite::Insert { table, .. } => table,
            StoreWrite::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreWrite::Put { key, .. } => key,
            StoreWrite::Insert { key, .. } => key,
            StoreWrite::Delete { key, .. } => key,
        }
    }
}

#[derive(Clone, Debug)]
pub enum StoreRead {
    Key { table: String, key: String },
    /// All rows of a table, in key order.
    Table { table: String },
}

/// The two write paths of the distributed store.
#[derive(Clone, Debug)]
pub enum WriteMode {
    /// Lock-guarded write. With `Some(lock)` the caller already holds the lock for the written key;
    /// with `None` the store takes and releases the key's lock around the write.
    Critical(Option<LockId>),
    /// Unguarded write, last-write-wins.
    Eventual,
}

pub type StoredRow = (String, Bytes);

/// DistributedStore is the replicated, leaderless, sorted key-value store that serves as the
/// cross-node source of truth, plus its distributed mutual-exclusion primitive.
///
/// Calls may block on the network. Callers bound them with a timeout; see `RemoteStore`.
#[async_trait::async_trait]
pub trait DistributedStore: Send + Sync {
    /// Idempotent. Racing creators must all succeed.
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;

    async fn write(&self, write: StoreWrite, mode: WriteMode) -> Result<(), StoreError>;

    async fn read(&self, read: StoreRead) -> Result<Vec<StoredRow>, StoreError>;

    /// Blocks until the lock for `resource` is granted.
    async fn acquire_lock(&self, resource: &str) -> Result<LockId, StoreError>;

    async fn release_lock(&self, lock: LockId) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Table {0} does not exist")]
    UnknownTable(String),

    #[error("Key {key} already exists in {table}")]
    KeyExists { table: String, key: String },

    #[error("Lock {lock:?} is not held for resource {resource}")]
    LockNotHeld { lock: LockId, resource: String },

    #[error("Unknown lock {0:?}")]
    UnknownLock(LockId),

    #[error("Timed out acquiring lock for {0}")]
    LockTimeout(String),

    #[error("Distributed store unavailable")]
    Unavailable,

    #[error("Remote call timed out")]
    Timeout,

    #[error("Remote call cancelled")]
    Cancelled,
}

impl StoreError {
    /// True if the store could not be reached, as opposed to rejecting the request.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Unavailable | StoreError::Timeout | StoreError::Cancelled)
    }
}
