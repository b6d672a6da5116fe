//! In-memory host chain used by tests and offline development.
//!
//! Behavior mirrors the production contracts where the core depends on it:
//! keeps are created with a member list and honest threshold, the public key
//! can be submitted exactly once, signature requests mark the keep as
//! awaiting a specific digest, and close/terminate flip the keep inactive
//! while emitting the matching event.

use crate::domain::KeepState;
use crate::foundation::{
    now_secs, Digest, EcdsaSignature, GroupPublicKey, KeepId, MemberId, NodeError, OperatorAddress, Result,
};
use crate::infrastructure::chain::{
    subscription_from_broadcast, EventSubscription, FundingInfo, HostChain, KeepClosedEvent, KeepCreatedEvent,
    KeepHandle, KeepTerminatedEvent, SignatureRequestedEvent, TbtcApplication,
};
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct KeepRecord {
    members: Vec<OperatorAddress>,
    honest_threshold: u64,
    opened_at: u64,
    owner: OperatorAddress,
    public_key: Option<GroupPublicKey>,
    active: bool,
    terminated: bool,
    awaiting: HashMap<Digest, u64>,
    latest_digest: Option<Digest>,
    submitted_signatures: Vec<EcdsaSignature>,
    signature_tx: broadcast::Sender<SignatureRequestedEvent>,
    closed_tx: broadcast::Sender<KeepClosedEvent>,
    terminated_tx: broadcast::Sender<KeepTerminatedEvent>,
}

impl KeepRecord {
    fn new(members: Vec<OperatorAddress>, honest_threshold: u64, owner: OperatorAddress) -> Self {
        Self {
            members,
            honest_threshold,
            opened_at: now_secs(),
            owner,
            public_key: None,
            active: true,
            terminated: false,
            awaiting: HashMap::new(),
            latest_digest: None,
            submitted_signatures: Vec::new(),
            signature_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            closed_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            terminated_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }
}

struct ChainState {
    keeps: Vec<KeepId>,
    records: HashMap<KeepId, KeepRecord>,
}

struct Shared {
    operator: OperatorAddress,
    state: Mutex<ChainState>,
    block_tx: watch::Sender<u64>,
    created_tx: broadcast::Sender<KeepCreatedEvent>,
}

impl Shared {
    fn lock_state(&self) -> Result<MutexGuard<'_, ChainState>> {
        self.state.lock().map_err(|_| NodeError::Storage {
            operation: "local chain lock".to_string(),
            details: "state lock poisoned".to_string(),
        })
    }
}

#[derive(Clone)]
pub struct LocalChain {
    shared: Arc<Shared>,
}

impl LocalChain {
    pub fn new(operator: OperatorAddress) -> Self {
        Self {
            shared: Arc::new(Shared {
                operator,
                state: Mutex::new(ChainState { keeps: Vec::new(), records: HashMap::new() }),
                block_tx: watch::channel(1u64).0,
                created_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            }),
        }
    }

    pub fn create_keep(&self, keep_id: KeepId, members: Vec<OperatorAddress>, honest_threshold: u64) -> Result<()> {
        self.create_keep_with_owner(keep_id, members, honest_threshold, OperatorAddress::new([0xDE; 20]))
    }

    pub fn create_keep_with_owner(
        &self,
        keep_id: KeepId,
        members: Vec<OperatorAddress>,
        honest_threshold: u64,
        owner: OperatorAddress,
    ) -> Result<()> {
        let block_number = self.block();
        {
            let mut state = self.shared.lock_state()?;
            if state.records.contains_key(&keep_id) {
                return Err(NodeError::ChainState(format!("keep [{keep_id}] already exists")));
            }
            state.keeps.push(keep_id);
            state.records.insert(keep_id, KeepRecord::new(members.clone(), honest_threshold, owner));
        }
        // Publishing with no subscribers is not an error.
        let _ = self.shared.created_tx.send(KeepCreatedEvent { keep_id, members, honest_threshold, block_number });
        Ok(())
    }

    /// Rewrites the opened timestamp; lets tests place keeps outside the
    /// key-generation lookback window.
    pub fn set_opened_at(&self, keep_id: &KeepId, opened_at: u64) -> Result<()> {
        let mut state = self.shared.lock_state()?;
        let record = record_mut(&mut state, keep_id)?;
        record.opened_at = opened_at;
        Ok(())
    }

    pub fn request_signature(&self, keep_id: &KeepId, digest: Digest) -> Result<()> {
        let block_number = self.block();
        let signature_tx = {
            let mut state = self.shared.lock_state()?;
            let record = record_mut(&mut state, keep_id)?;
            if record.public_key.is_none() {
                return Err(NodeError::ChainState(format!("keep [{keep_id}] has no public key")));
            }
            if !record.active {
                return Err(NodeError::ChainState(format!("keep [{keep_id}] is not active")));
            }
            record.awaiting.insert(digest, block_number);
            record.latest_digest = Some(digest);
            record.signature_tx.clone()
        };
        let _ = signature_tx.send(SignatureRequestedEvent { digest, block_number });
        Ok(())
    }

    /// Drops an in-flight signature request, as a chain reorg would.
    pub fn clear_awaiting(&self, keep_id: &KeepId, digest: &Digest) -> Result<()> {
        let mut state = self.shared.lock_state()?;
        let record = record_mut(&mut state, keep_id)?;
        record.awaiting.remove(digest);
        Ok(())
    }

    pub fn close_keep(&self, keep_id: &KeepId) -> Result<()> {
        let block_number = self.block();
        let closed_tx = {
            let mut state = self.shared.lock_state()?;
            let record = record_mut(&mut state, keep_id)?;
            record.active = false;
            record.closed_tx.clone()
        };
        let _ = closed_tx.send(KeepClosedEvent { block_number });
        Ok(())
    }

    pub fn terminate_keep(&self, keep_id: &KeepId) -> Result<()> {
        let block_number = self.block();
        let terminated_tx = {
            let mut state = self.shared.lock_state()?;
            let record = record_mut(&mut state, keep_id)?;
            record.active = false;
            record.terminated = true;
            record.terminated_tx.clone()
        };
        let _ = terminated_tx.send(KeepTerminatedEvent { block_number });
        Ok(())
    }

    /// Marks a keep active again without emitting events; used to model a
    /// close observation that deeper blocks contradict.
    pub fn reactivate_keep(&self, keep_id: &KeepId) -> Result<()> {
        let mut state = self.shared.lock_state()?;
        let record = record_mut(&mut state, keep_id)?;
        record.active = true;
        Ok(())
    }

    pub fn block(&self) -> u64 {
        *self.shared.block_tx.borrow()
    }

    pub fn advance_blocks(&self, count: u64) {
        let next = self.block().saturating_add(count);
        self.shared.block_tx.send_replace(next);
    }

    pub fn submitted_signatures(&self, keep_id: &KeepId) -> Result<Vec<EcdsaSignature>> {
        let state = self.shared.lock_state()?;
        let record = state.records.get(keep_id).ok_or_else(|| unknown_keep(keep_id))?;
        Ok(record.submitted_signatures.clone())
    }

    pub fn public_key_of(&self, keep_id: &KeepId) -> Result<Option<GroupPublicKey>> {
        let state = self.shared.lock_state()?;
        let record = state.records.get(keep_id).ok_or_else(|| unknown_keep(keep_id))?;
        Ok(record.public_key)
    }

    pub fn state_of(&self, keep_id: &KeepId) -> Result<KeepState> {
        let state = self.shared.lock_state()?;
        let record = state.records.get(keep_id).ok_or_else(|| unknown_keep(keep_id))?;
        let derived = if record.terminated {
            KeepState::Terminated
        } else if !record.active {
            KeepState::Closed
        } else if record.public_key.is_none() {
            KeepState::AwaitingKey
        } else if record.awaiting.is_empty() {
            KeepState::Active
        } else {
            KeepState::AwaitingSignature
        };
        Ok(derived)
    }

    fn handle(&self, keep_id: KeepId) -> Arc<dyn KeepHandle> {
        Arc::new(LocalKeep { keep_id, shared: Arc::clone(&self.shared) })
    }
}

fn record_mut<'a>(state: &'a mut ChainState, keep_id: &KeepId) -> Result<&'a mut KeepRecord> {
    state.records.get_mut(keep_id).ok_or_else(|| unknown_keep(keep_id))
}

fn unknown_keep(keep_id: &KeepId) -> NodeError {
    NodeError::ChainState(format!("no keep with address [{keep_id}]"))
}

#[async_trait]
impl HostChain for LocalChain {
    fn operator_address(&self) -> OperatorAddress {
        self.shared.operator
    }

    fn pubkey_to_address(&self, public_key: &MemberId) -> OperatorAddress {
        let hash = sha256::Hash::hash(public_key.as_bytes()).to_byte_array();
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..32]);
        OperatorAddress::new(address)
    }

    async fn current_block(&self) -> Result<u64> {
        Ok(self.block())
    }

    async fn wait_for_block(&self, height: u64) -> Result<()> {
        let mut receiver = self.shared.block_tx.subscribe();
        while *receiver.borrow_and_update() < height {
            receiver
                .changed()
                .await
                .map_err(|_| NodeError::chain("wait_for_block", "block counter closed"))?;
        }
        Ok(())
    }

    async fn keep_count(&self) -> Result<u64> {
        Ok(self.shared.lock_state()?.keeps.len() as u64)
    }

    async fn keep_at_index(&self, index: u64) -> Result<Arc<dyn KeepHandle>> {
        let keep_id = {
            let state = self.shared.lock_state()?;
            state
                .keeps
                .get(index as usize)
                .copied()
                .ok_or_else(|| NodeError::ChainState(format!("no keep at index [{index}]")))?
        };
        Ok(self.handle(keep_id))
    }

    async fn keep(&self, keep_id: &KeepId) -> Result<Arc<dyn KeepHandle>> {
        {
            let state = self.shared.lock_state()?;
            if !state.records.contains_key(keep_id) {
                return Err(unknown_keep(keep_id));
            }
        }
        Ok(self.handle(*keep_id))
    }

    async fn on_keep_created(&self) -> Result<EventSubscription<KeepCreatedEvent>> {
        Ok(subscription_from_broadcast(self.shared.created_tx.subscribe()))
    }
}

struct LocalKeep {
    keep_id: KeepId,
    shared: Arc<Shared>,
}

impl LocalKeep {
    fn with_record<T>(&self, read: impl FnOnce(&KeepRecord) -> T) -> Result<T> {
        let state = self.shared.lock_state()?;
        let record = state.records.get(&self.keep_id).ok_or_else(|| unknown_keep(&self.keep_id))?;
        Ok(read(record))
    }
}

#[async_trait]
impl KeepHandle for LocalKeep {
    fn id(&self) -> KeepId {
        self.keep_id
    }

    async fn is_active(&self) -> Result<bool> {
        self.with_record(|record| record.active)
    }

    async fn public_key(&self) -> Result<Option<GroupPublicKey>> {
        self.with_record(|record| record.public_key)
    }

    async fn members(&self) -> Result<Vec<OperatorAddress>> {
        self.with_record(|record| record.members.clone())
    }

    async fn honest_threshold(&self) -> Result<u64> {
        self.with_record(|record| record.honest_threshold)
    }

    async fn opened_at(&self) -> Result<u64> {
        self.with_record(|record| record.opened_at)
    }

    async fn owner(&self) -> Result<OperatorAddress> {
        self.with_record(|record| record.owner)
    }

    async fn latest_digest(&self) -> Result<Option<Digest>> {
        self.with_record(|record| record.latest_digest)
    }

    async fn is_awaiting_signature(&self, digest: &Digest) -> Result<bool> {
        self.with_record(|record| record.awaiting.contains_key(digest))
    }

    async fn signature_requested_block(&self, digest: &Digest) -> Result<u64> {
        self.with_record(|record| record.awaiting.get(digest).copied())?
            .ok_or_else(|| NodeError::ChainState(format!("keep [{}] has no request for digest [{digest}]", self.keep_id)))
    }

    async fn submit_public_key(&self, public_key: &GroupPublicKey) -> Result<()> {
        let mut state = self.shared.lock_state()?;
        let record = record_mut(&mut state, &self.keep_id)?;
        if record.public_key.is_some() {
            return Err(NodeError::ChainState(format!("public key already submitted for keep [{}]", self.keep_id)));
        }
        record.public_key = Some(*public_key);
        Ok(())
    }

    async fn submit_signature(&self, signature: &EcdsaSignature) -> Result<()> {
        let mut state = self.shared.lock_state()?;
        let record = record_mut(&mut state, &self.keep_id)?;
        record.submitted_signatures.push(*signature);
        record.awaiting.clear();
        Ok(())
    }

    async fn on_signature_requested(&self) -> Result<EventSubscription<SignatureRequestedEvent>> {
        let receiver = self.with_record(|record| record.signature_tx.subscribe())?;
        Ok(subscription_from_broadcast(receiver))
    }

    async fn on_keep_closed(&self) -> Result<EventSubscription<KeepClosedEvent>> {
        let receiver = self.with_record(|record| record.closed_tx.subscribe())?;
        Ok(subscription_from_broadcast(receiver))
    }

    async fn on_keep_terminated(&self) -> Result<EventSubscription<KeepTerminatedEvent>> {
        let receiver = self.with_record(|record| record.terminated_tx.subscribe())?;
        Ok(subscription_from_broadcast(receiver))
    }
}

/// Static tBTC application double: fixed funding info, no-op registration.
pub struct LocalTbtcApplication {
    funding: FundingInfo,
}

impl LocalTbtcApplication {
    pub fn new(funding: FundingInfo) -> Self {
        Self { funding }
    }
}

#[async_trait]
impl TbtcApplication for LocalTbtcApplication {
    async fn register_as_member_candidate(&self) -> Result<()> {
        Ok(())
    }

    async fn funding_info(&self, _deposit: &OperatorAddress) -> Result<FundingInfo> {
        Ok(self.funding.clone())
    }
}
