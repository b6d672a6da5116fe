//! Threshold-ECDSA engine seam.
//!
//! The multi-party cryptography lives behind this trait; the node core only
//! drives it. Key generation is stateful across peers and therefore not
//! idempotent: callers must never re-run it for a keep after a failure.

pub mod mock;
pub mod pool;

pub use mock::MockTssEngine;
pub use pool::{PreParams, PreParamsPool};

use crate::domain::{GroupParameters, KeepSigner};
use crate::foundation::{Digest, EcdsaSignature, KeepId, MemberId, OperatorAddress, Result};
use async_trait::async_trait;

#[async_trait]
pub trait TssEngine: Send + Sync {
    /// Starts filling the pre-parameters pool; filling continues in the
    /// background until engine shutdown.
    async fn init_pre_params_pool(&self) -> Result<()>;

    fn pre_params_pool_size(&self) -> usize;

    /// Runs distributed key generation for the keep. Callers scope this with
    /// a deadline; dropping the future aborts this node's participation.
    async fn generate_signer(&self, keep_id: &KeepId, group: &GroupParameters) -> Result<KeepSigner>;

    async fn sign(&self, signer: &KeepSigner, digest: &Digest) -> Result<EcdsaSignature>;

    /// Announces this node on the keep's signing channel and returns the
    /// member ids of every announced member, ours included.
    async fn announce_signer_presence(&self, keep_id: &KeepId, members: &[OperatorAddress]) -> Result<Vec<MemberId>>;
}
