//! Redo log kept in the distributed store: partition info, TIT rows, redo records and the redo
//! history DAG, plus replay into the local store.
mod lease;
mod log;
mod replay;
mod rows;
mod tables;

pub use lease::Lease;
pub use log::RedoLog;
pub use log::RedoLogError;
pub use replay::replay_partition;
pub use replay::replay_tit;
pub use replay::ReplayReport;
pub use rows::PartitionInfoRow;
pub use rows::RedoHistoryRow;
pub use rows::TableToPartitionRow;
pub use rows::TitRow;
pub use tables::RedoLogTables;
