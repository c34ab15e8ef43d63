//! Mirroring of local writes into the distributed store, and dirty-marker read repair.
mod dirty;

pub use dirty::DirtySync;
pub use dirty::MirrorChange;
pub use dirty::RepairReport;
pub use dirty::SyncError;
