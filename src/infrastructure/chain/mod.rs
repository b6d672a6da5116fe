//! Host-chain collaborator seam.
//!
//! The node core is host-agnostic: concrete connectors (Ethereum-like or
//! otherwise) implement these traits out of tree. `LocalChain` is the
//! in-tree implementation used by tests and offline development.

pub mod confirm;
pub mod local;

use crate::foundation::{Digest, EcdsaSignature, GroupPublicKey, KeepId, MemberId, OperatorAddress, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepCreatedEvent {
    pub keep_id: KeepId,
    pub members: Vec<OperatorAddress>,
    pub honest_threshold: u64,
    pub block_number: u64,
}

impl KeepCreatedEvent {
    pub fn is_member(&self, operator: &OperatorAddress) -> bool {
        self.members.contains(operator)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureRequestedEvent {
    pub digest: Digest,
    pub block_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepClosedEvent {
    pub block_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepTerminatedEvent {
    pub block_number: u64,
}

/// Handle to a chain event stream. The subscriber owns the handle; dropping
/// it (or calling `unsubscribe`) detaches from the underlying feed.
pub struct EventSubscription<T> {
    inner: BoxStream<'static, T>,
}

impl<T> EventSubscription<T> {
    pub fn new(inner: BoxStream<'static, T>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<T> {
        self.inner.next().await
    }

    pub fn unsubscribe(self) {}
}

/// Adapts a `tokio::sync::broadcast` receiver into an event subscription.
/// Lagged receivers skip ahead; a closed sender ends the stream.
pub fn subscription_from_broadcast<T>(mut receiver: broadcast::Receiver<T>) -> EventSubscription<T>
where
    T: Clone + Send + 'static,
{
    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => yield event,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    };
    EventSubscription::new(Box::pin(stream))
}

#[async_trait]
pub trait HostChain: Send + Sync {
    /// The operator address this node transacts as.
    fn operator_address(&self) -> OperatorAddress;

    /// Maps an operator network public key to its host-chain address.
    fn pubkey_to_address(&self, public_key: &MemberId) -> OperatorAddress;

    async fn current_block(&self) -> Result<u64>;

    /// Resolves once the chain has reached at least the given height.
    async fn wait_for_block(&self, height: u64) -> Result<()>;

    async fn keep_count(&self) -> Result<u64>;

    async fn keep_at_index(&self, index: u64) -> Result<Arc<dyn KeepHandle>>;

    async fn keep(&self, keep_id: &KeepId) -> Result<Arc<dyn KeepHandle>>;

    async fn on_keep_created(&self) -> Result<EventSubscription<KeepCreatedEvent>>;
}

#[async_trait]
pub trait KeepHandle: Send + Sync {
    fn id(&self) -> KeepId;

    async fn is_active(&self) -> Result<bool>;

    /// The group public key, once one has been submitted on-chain. Immutable
    /// after the first submission.
    async fn public_key(&self) -> Result<Option<GroupPublicKey>>;

    async fn members(&self) -> Result<Vec<OperatorAddress>>;

    async fn honest_threshold(&self) -> Result<u64>;

    /// Unix timestamp of keep creation.
    async fn opened_at(&self) -> Result<u64>;

    /// The application contract owning this keep (the deposit for tBTC).
    async fn owner(&self) -> Result<OperatorAddress>;

    async fn latest_digest(&self) -> Result<Option<Digest>>;

    async fn is_awaiting_signature(&self, digest: &Digest) -> Result<bool>;

    async fn signature_requested_block(&self, digest: &Digest) -> Result<u64>;

    async fn submit_public_key(&self, public_key: &GroupPublicKey) -> Result<()>;

    async fn submit_signature(&self, signature: &EcdsaSignature) -> Result<()>;

    async fn on_signature_requested(&self) -> Result<EventSubscription<SignatureRequestedEvent>>;

    async fn on_keep_closed(&self) -> Result<EventSubscription<KeepClosedEvent>>;

    async fn on_keep_terminated(&self) -> Result<EventSubscription<KeepTerminatedEvent>>;
}

/// Funding UTXO of the deposit a terminated keep was custodying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingInfo {
    /// Transaction id in display (reversed) hex.
    pub outpoint_txid_hex: String,
    pub outpoint_index: u32,
    pub value_sats: u64,
}

/// The sanctioned application this operator works for (tBTC).
#[async_trait]
pub trait TbtcApplication: Send + Sync {
    /// One-shot candidate registration; failure is logged by the caller but
    /// never fatal.
    async fn register_as_member_candidate(&self) -> Result<()>;

    async fn funding_info(&self, deposit: &OperatorAddress) -> Result<FundingInfo>;
}
