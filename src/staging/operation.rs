use crate::store::{Row, RowKey};
use std::convert::TryFrom;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl From<OperationType> for u8 {
    fn from(op_type: OperationType) -> Self {
        match op_type {
            OperationType::Insert => 1,
            OperationType::Update => 2,
            OperationType::Delete => 3,
        }
    }
}

impl TryFrom<u8> for OperationType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OperationType::Insert),
            2 => Ok(OperationType::Update),
            3 => Ok(OperationType::Delete),
            other => Err(other),
        }
    }
}

/// One row mutation inside an open transaction.
///
/// * Insert: `old_value` is `None`.
/// * Update: both values are set.
/// * Delete: `new_value` is `None`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    pub op_type: OperationType,
    pub old_value: Option<Row>,
    pub new_value: Option<Row>,
}

impl Operation {
    pub fn insert(new_value: Row) -> Self {
        Operation {
            op_type: OperationType::Insert,
            old_value: None,
            new_value: Some(new_value),
        }
    }

    pub fn update(old_value: Option<Row>, new_value: Row) -> Self {
        Operation {
            op_type: OperationType::Update,
            old_value,
            new_value: Some(new_value),
        }
    }

    pub fn delete(old_value: Option<Row>) -> Self {
        Operation {
            op_type: OperationType::Delete,
            old_value,
            new_value: None,
        }
    }
}

/// Row identity inside a staging table.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StagedKey {
    pub table: String,
    pub key: RowKey,
}

impl StagedKey {
    pub fn new(table: impl Into<String>, key: RowKey) -> Self {
        StagedKey {
            table: table.into(),
            key,
        }
    }
}
