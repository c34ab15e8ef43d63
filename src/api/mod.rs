//! This mod is meant to hold most of the code for the library's client-facing API.
mod commit;
mod node;
mod options;
mod session;
mod wiring;

pub use commit::CommitError;
pub use commit::CommitOutcome;
pub use node::MirrorNode;
pub use node::NodeError;
pub use options::NodeOptions;
pub use session::Session;
pub use session::SessionError;
pub use wiring::try_create_node;
pub use wiring::NodeConfig;
pub use wiring::NodeCreationError;
