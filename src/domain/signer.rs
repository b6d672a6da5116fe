use crate::foundation::{GroupPublicKey, KeepId, Result};
use serde::{Deserialize, Serialize};

/// Local share material held by this operator for one keep.
///
/// Created only by a successful key generation; destroyed only when a
/// confirmed close or termination unregisters the keep. The `share` blob is
/// owned by the TSS engine and opaque to everything else.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct KeepSigner {
    pub keep_id: KeepId,
    pub member_index: u32,
    pub share: Vec<u8>,
    pub group_public_key: GroupPublicKey,
}

impl KeepSigner {
    /// Snapshot format persisted by the keeps registry.
    pub fn to_snapshot(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
