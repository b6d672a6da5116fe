//! Application layer: the per-keep coordinator, the process-wide node
//! controller, event deduplication and liquidation recovery.

pub mod coordinator;
pub mod dedup;
pub mod node;
pub mod recovery;

pub use coordinator::KeepCoordinator;
pub use dedup::EventDeduplicator;
pub use node::{NodeContext, NodeController};
pub use recovery::{run_liquidation_recovery, RecoveryResult};
