use serde::{Deserialize, Serialize};
use std::fmt;

/// Random 128-bit identifier rendered as lowercase hex. Used wherever the distributed store needs a
/// collision-free key without a central sequencer.
pub(crate) fn random_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name::new(id)
            }
        }
    };
}

string_id!(
    /// Identity of a node. A node is also a replica: every node keeps its own dirty tables.
    NodeId
);
string_id!(
    /// Unit of table/range ownership.
    PartitionId
);
string_id!(
    /// Identity of a transaction-information (TIT) row.
    TitId
);
string_id!(
    /// Namespace for a writer's monotonically increasing redo-record counter.
    LeaseId
);
string_id!(
    /// Local transaction id. One per logical connection; reused across that connection's transactions.
    TxId
);

impl PartitionId {
    pub(crate) fn generate() -> Self {
        PartitionId(random_id())
    }
}

impl TitId {
    pub(crate) fn generate() -> Self {
        TitId(random_id())
    }
}

impl LeaseId {
    pub(crate) fn generate() -> Self {
        LeaseId(random_id())
    }
}

/// Globally ordered commit id, assigned lazily at commit time.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CommitId(u64);

impl CommitId {
    pub(crate) fn new(id: u64) -> Self {
        CommitId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of an immutable redo record: `(lease id, lease counter)`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RedoRecordId {
    pub lease_id: LeaseId,
    pub lease_counter: u64,
}

impl RedoRecordId {
    pub fn new(lease_id: LeaseId, lease_counter: u64) -> Self {
        RedoRecordId {
            lease_id,
            lease_counter,
        }
    }

    /// Store key for this record. The counter is zero-padded so that the sorted store keeps one
    /// lease's records in counter order.
    pub(crate) fn store_key(&self) -> String {
        format!("{}:{:020}", self.lease_id, self.lease_counter)
    }
}

impl fmt::Debug for RedoRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.lease_id, self.lease_counter)
    }
}
