mod api;
mod commit;
mod ids;
mod partition;
mod redolog;
mod staging;
mod store;
mod sync;

pub use api::try_create_node;
pub use api::CommitError;
pub use api::CommitOutcome;
pub use api::MirrorNode;
pub use api::NodeConfig;
pub use api::NodeCreationError;
pub use api::NodeError;
pub use api::NodeOptions;
pub use api::Session;
pub use api::SessionError;
pub use commit::CommitState;
pub use commit::TrackerError;
pub use commit::TxCommitTracker;
pub use ids::CommitId;
pub use ids::LeaseId;
pub use ids::NodeId;
pub use ids::PartitionId;
pub use ids::RedoRecordId;
pub use ids::TitId;
pub use ids::TxId;
pub use partition::CompositeIndex;
pub use partition::ConfigFileError;
pub use partition::Partition;
pub use partition::PartitionConfiguration;
pub use partition::PartitionEntry;
pub use partition::PartitionError;
pub use partition::PartitionModel;
pub use partition::PartitionSnapshot;
pub use partition::Range;
pub use partition::RangeBound;
pub use partition::TableOwnership;
pub use redolog::replay_partition;
pub use redolog::replay_tit;
pub use redolog::Lease;
pub use redolog::PartitionInfoRow;
pub use redolog::RedoHistoryRow;
pub use redolog::RedoLog;
pub use redolog::RedoLogError;
pub use redolog::RedoLogTables;
pub use redolog::ReplayReport;
pub use redolog::TableToPartitionRow;
pub use redolog::TitRow;
pub use staging::Operation;
pub use staging::OperationType;
pub use staging::StagedKey;
pub use staging::StagingError;
pub use staging::StagingTable;
pub use staging::TransactionDigest;
pub use store::lock_resource;
pub use store::upsert;
pub use store::Column;
pub use store::ColumnCountMismatch;
pub use store::DistributedBackend;
pub use store::DistributedStore;
pub use store::InMemoryDistributedStore;
pub use store::InMemoryLocalStore;
pub use store::LocalBackend;
pub use store::LocalConnectionId;
pub use store::LocalOutcome;
pub use store::LocalStatement;
pub use store::LocalStore;
pub use store::LocalStoreError;
pub use store::LockId;
pub use store::RemoteStore;
pub use store::Row;
pub use store::RowKey;
pub use store::StoreError;
pub use store::StoreRead;
pub use store::StoreWrite;
pub use store::StoredRow;
pub use store::TableSchema;
pub use store::Value;
pub use store::WriteMode;
pub use sync::DirtySync;
pub use sync::MirrorChange;
pub use sync::RepairReport;
pub use sync::SyncError;

// `crate::{root_mod}` holds no code, just `mod` and `pub use` statements. No `mod` is `pub`; types
// reach the rest of the crate and its users only through `pub use`.
