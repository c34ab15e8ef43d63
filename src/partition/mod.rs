//! Table and range ownership.
mod configuration;
mod model;
mod range;

pub use configuration::ConfigFileError;
pub use configuration::PartitionConfiguration;
pub use configuration::PartitionEntry;
pub use model::Partition;
pub use model::PartitionError;
pub use model::PartitionModel;
pub use model::PartitionSnapshot;
pub use model::TableOwnership;
pub use range::CompositeIndex;
pub use range::Range;
pub use range::RangeBound;
