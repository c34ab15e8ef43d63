//! Contracts of the two stores a node writes to, their in-memory implementations, and the
//! timeout-bounded handle the rest of the crate uses for distributed calls.
mod backend;
mod distributed;
mod in_memory;
mod local;
mod remote;
mod row;

pub use backend::DistributedBackend;
pub use backend::LocalBackend;
pub use distributed::lock_resource;
pub use distributed::DistributedStore;
pub use distributed::LockId;
pub use distributed::StoreError;
pub use distributed::StoreRead;
pub use distributed::StoreWrite;
pub use distributed::StoredRow;
pub use distributed::WriteMode;
pub use in_memory::InMemoryDistributedStore;
pub use in_memory::InMemoryLocalStore;
pub use local::LocalConnectionId;
pub use local::LocalOutcome;
pub use local::LocalStatement;
pub use local::LocalStore;
pub use local::LocalStoreError;
pub use local::upsert;
pub use remote::RemoteStore;
pub use row::Column;
pub use row::ColumnCountMismatch;
pub use row::Row;
pub use row::RowKey;
pub use row::TableSchema;
pub use row::Value;
