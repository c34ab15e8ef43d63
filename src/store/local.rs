use crate::store::row::{ColumnCountMismatch, Row, RowKey, TableSchema};
use std::fmt;

/// Handle to one connection of the local relational store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocalConnectionId(u64);

impl LocalConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        LocalConnectionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LocalConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Statement sent to the local store. This is the row-level shape the SQL driver layer hands us
/// after it has parsed and marshalled a client statement.
#[derive(Clone, Debug)]
pub enum LocalStatement {
    Insert { table: String, row: Row },
    /// Replace the row with the same primary key. Affects zero rows if the key is absent.
    Update { table: String, row: Row },
    Delete { table: String, key: RowKey },
    Select { table: String },
    SelectKey { table: String, key: RowKey },
}

#[derive(Debug, Eq, PartialEq)]
pub enum LocalOutcome {
    RowsAffected(usize),
    Rows(Vec<Row>),
}

impl LocalOutcome {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            LocalOutcome::Rows(rows) => rows,
            LocalOutcome::RowsAffected(_) => vec![],
        }
    }

    pub fn rows_affected(&self) -> usize {
        match self {
            LocalOutcome::RowsAffected(n) => *n,
            LocalOutcome::Rows(rows) => rows.len(),
        }
    }
}

/// LocalStore is the node's own relational copy. Every statement runs inside the connection's
/// current transaction until `commit()` or `rollback()`.
pub trait LocalStore: Send + Sync {
    fn open_connection(&self) -> Result<LocalConnectionId, LocalStoreError>;

    /// Closing rolls back anything uncommitted on the connection.
    fn close_connection(&self, conn: LocalConnectionId);

    fn table_schema(&self, table: &str) -> Result<TableSchema, LocalStoreError>;

    /// An insert of an existing primary key must fail with `LocalStoreError::DuplicateKey`, which is
    /// what read repair relies on to fall back to an update.
    fn execute(&self, conn: LocalConnectionId, statement: LocalStatement) -> Result<LocalOutcome, LocalStoreError>;

    fn commit(&self, conn: LocalConnectionId) -> Result<(), LocalStoreError>;

    fn rollback(&self, conn: LocalConnectionId) -> Result<(), LocalStoreError>;
}

/// Insert `row`, or replace the stored row if its key already exists.
pub fn upsert(
    store: &dyn LocalStore,
    conn: LocalConnectionId,
    table: &str,
    row: Row,
) -> Result<(), LocalStoreError> {
    let insert = LocalStatement::Insert {
        table: table.to_string(),
        row: row.clone(),
    };
    match store.execute(conn, insert) {
        Ok(_) => Ok(()),
        Err(LocalStoreError::DuplicateKey { .. }) => {
            let update = LocalStatement::Update {
                table: table.to_string(),
                row,
            };
            store.execute(conn, update).map(|_| ())
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Unknown table {0}")]
    UnknownTable(String),

    #[error("Duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: RowKey },

    #[error("Unknown local connection {0:?}")]
    UnknownConnection(LocalConnectionId),

    #[error("Row does not match local schema")]
    Schema(#[from] ColumnCountMismatch),

    #[error("Local store failure: {0}")]
    Backend(String),
}
