pub mod disk;
pub mod memory;

pub use disk::DiskPersistence;
pub use memory::MemoryPersistence;

use crate::foundation::{KeepId, Result};

/// Byte-level snapshot store for per-keep signer material.
///
/// `save` must be durable before returning: a snapshot written here has to
/// survive a process restart and come back identical from `load_all`.
/// `archive` moves a snapshot out of the active set and is idempotent.
pub trait Persistence: Send + Sync {
    fn save(&self, keep_id: &KeepId, snapshot: &[u8]) -> Result<()>;

    fn load_all(&self) -> Result<Vec<(KeepId, Vec<u8>)>>;

    fn archive(&self, keep_id: &KeepId) -> Result<()>;

    fn has(&self, keep_id: &KeepId) -> Result<bool>;
}
