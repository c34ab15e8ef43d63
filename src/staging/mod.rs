//! Write-set staging for open transactions.
mod digest;
mod operation;
mod table;

pub use digest::TransactionDigest;
pub use operation::Operation;
pub use operation::OperationType;
pub use operation::StagedKey;
pub use table::StagingError;
pub use table::StagingTable;
