use crate::foundation::Result;
use crate::infrastructure::chain::HostChain;
use std::future::Future;

/// Number of blocks an observation must settle before it is acted upon.
/// Chosen for the host chain's reorg probability; deliberately a global
/// constant rather than a per-call knob.
pub const BLOCK_CONFIRMATIONS: u64 = 12;

/// Waits until the chain is `BLOCK_CONFIRMATIONS` blocks past `start_block`,
/// then re-evaluates `predicate` against the settled state.
///
/// Every irreversible local action (signer archiving, key-generation commit,
/// signing) is gated on a prior call to this function. Errors only when the
/// chain client itself errors.
pub async fn wait_for_confirmation<F, Fut>(chain: &dyn HostChain, start_block: u64, predicate: F) -> Result<bool>
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send,
{
    chain.wait_for_block(start_block.saturating_add(BLOCK_CONFIRMATIONS)).await?;
    predicate().await
}
