//! Per-transaction commit progress.
mod progress;
mod tracker;

pub use progress::CommitState;
pub use tracker::TrackerError;
pub use tracker::TxCommitTracker;
