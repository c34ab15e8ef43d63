use crate::staging::digest::TransactionDigest;
use crate::staging::operation::{Operation, OperationType, StagedKey};
use crate::store::Row;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// StagingTable buffers the row mutations of one open transaction.
///
/// Operations are only ever appended, so the full per-key history stays available. Commit only
/// looks at the last operation recorded for each key.
pub struct StagingTable {
    operations: Mutex<BTreeMap<StagedKey, Vec<Operation>>>,
}

impl StagingTable {
    pub fn new() -> Self {
        StagingTable {
            operations: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record(&self, key: StagedKey, op_type: OperationType, old_value: Option<Row>, new_value: Option<Row>) {
        self.lock().entry(key).or_default().push(Operation {
            op_type,
            old_value,
            new_value,
        });
    }

    /// One `(key, last operation)` pair per staged key, in key order.
    pub fn snapshot(&self) -> Result<Vec<(StagedKey, Operation)>, StagingError> {
        let operations = self.lock();
        let mut snapshot = Vec::with_capacity(operations.len());
        for (key, ops) in operations.iter() {
            let last = ops
                .last()
                .ok_or_else(|| StagingError::EmptyOperationSet { key: key.clone() })?;
            snapshot.push((key.clone(), last.clone()));
        }

        Ok(snapshot)
    }

    /// Binary digest of `snapshot()`.
    pub fn compress(&self) -> Result<Bytes, StagingError> {
        Ok(TransactionDigest::new(self.snapshot()?).encode())
    }

    pub fn decompress(bytes: &[u8]) -> Result<TransactionDigest, StagingError> {
        TransactionDigest::decode(bytes)
    }

    /// Every operation recorded for `key`, oldest first.
    pub fn history(&self, key: &StagedKey) -> Vec<Operation> {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn discard(&self) {
        self.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<StagedKey, Vec<Operation>>> {
        self.operations.lock().expect("StagingTable mutex guard poison")
    }
}

impl Default for StagingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("No operations staged for {key:?}")]
    EmptyOperationSet { key: StagedKey },

    #[error("Corrupt transaction digest: {0}")]
    CorruptDigest(String),
}
