//! Deterministic engine double.
//!
//! Every member of a keep derives the same group key from the keep id, so a
//! committee of mock engines behaves like a completed DKG: identical public
//! keys, real recoverable signatures over requested digests.

use crate::domain::{GroupParameters, KeepSigner};
use crate::foundation::{Digest, EcdsaSignature, GroupPublicKey, KeepId, MemberId, NodeError, OperatorAddress, OperatorIdentity, Result};
use crate::infrastructure::tss::pool::{PreParams, PreParamsPool};
use crate::infrastructure::tss::TssEngine;
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use secp256k1::{All, Message, Secp256k1, SecretKey};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_POOL_TARGET: usize = 3;
const DEFAULT_POOL_GENERATION_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL_ROUND_DELAY: Duration = Duration::from_millis(10);

const SHARE_DOMAIN_TAG: &[u8] = b"mock-tss/group-share";
const MEMBER_DOMAIN_TAG: &[u8] = b"mock-tss/member-pub";
const PRE_PARAMS_DOMAIN_TAG: &[u8] = b"mock-tss/pre-params";

pub struct MockTssEngine {
    operator: OperatorIdentity,
    secp: Secp256k1<All>,
    pool: Arc<PreParamsPool>,
    pool_counter: Arc<AtomicU64>,
    sign_count: AtomicUsize,
    keygen_failure: AtomicBool,
}

impl MockTssEngine {
    pub fn new(operator: OperatorIdentity) -> Self {
        Self::with_pool(operator, DEFAULT_POOL_TARGET, DEFAULT_POOL_GENERATION_TIMEOUT)
    }

    pub fn with_pool(operator: OperatorIdentity, pool_target: usize, generation_timeout: Duration) -> Self {
        Self {
            operator,
            secp: Secp256k1::new(),
            pool: Arc::new(PreParamsPool::new(pool_target, generation_timeout)),
            pool_counter: Arc::new(AtomicU64::new(0)),
            sign_count: AtomicUsize::new(0),
            keygen_failure: AtomicBool::new(false),
        }
    }

    /// The off-chain identity the mock assigns to an operator address.
    pub fn member_id_for(address: &OperatorAddress) -> MemberId {
        let mut preimage = Vec::with_capacity(MEMBER_DOMAIN_TAG.len() + 20);
        preimage.extend_from_slice(MEMBER_DOMAIN_TAG);
        preimage.extend_from_slice(address.as_bytes());
        let hash = sha256::Hash::hash(&preimage).to_byte_array();
        let mut bytes = vec![0x02u8];
        bytes.extend_from_slice(&hash);
        MemberId::new(bytes)
    }

    pub fn identity_for(address: OperatorAddress) -> OperatorIdentity {
        OperatorIdentity { public_key: Self::member_id_for(&address), address }
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }

    pub fn set_keygen_failure(&self, fail: bool) {
        self.keygen_failure.store(fail, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn group_secret(keep_id: &KeepId) -> Result<SecretKey> {
        let mut preimage = Vec::with_capacity(SHARE_DOMAIN_TAG.len() + 20);
        preimage.extend_from_slice(SHARE_DOMAIN_TAG);
        preimage.extend_from_slice(keep_id.as_bytes());
        let hash = sha256::Hash::hash(&preimage).to_byte_array();
        Ok(SecretKey::from_slice(&hash)?)
    }
}

#[async_trait]
impl TssEngine for MockTssEngine {
    async fn init_pre_params_pool(&self) -> Result<()> {
        let counter = Arc::clone(&self.pool_counter);
        self.pool.spawn_filler(move || {
            let counter = Arc::clone(&counter);
            async move {
                sleep(Duration::from_millis(5)).await;
                let nonce = counter.fetch_add(1, Ordering::SeqCst);
                let mut preimage = Vec::with_capacity(PRE_PARAMS_DOMAIN_TAG.len() + 8);
                preimage.extend_from_slice(PRE_PARAMS_DOMAIN_TAG);
                preimage.extend_from_slice(&nonce.to_be_bytes());
                Ok(PreParams(sha256::Hash::hash(&preimage).to_byte_array().to_vec()))
            }
        });
        Ok(())
    }

    fn pre_params_pool_size(&self) -> usize {
        self.pool.size()
    }

    async fn generate_signer(&self, keep_id: &KeepId, group: &GroupParameters) -> Result<KeepSigner> {
        if self.keygen_failure.load(Ordering::SeqCst) {
            return Err(NodeError::protocol("key generation", "peer session diverged"));
        }
        let member_index = group
            .member_index(&self.operator.address)
            .ok_or_else(|| NodeError::protocol("key generation", "operator is not a group member"))?;

        // Pool entry is consumed if available; generation proceeds either
        // way, just slower in the real engine.
        let _pre_params = self.pool.take();

        sleep(PROTOCOL_ROUND_DELAY).await;

        let secret = Self::group_secret(keep_id)?;
        let public_key = secret.public_key(&self.secp);
        Ok(KeepSigner {
            keep_id: *keep_id,
            member_index,
            share: secret.secret_bytes().to_vec(),
            group_public_key: GroupPublicKey::from_secp(&public_key),
        })
    }

    async fn sign(&self, signer: &KeepSigner, digest: &Digest) -> Result<EcdsaSignature> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        sleep(PROTOCOL_ROUND_DELAY).await;

        let secret = SecretKey::from_slice(&signer.share)
            .map_err(|err| NodeError::protocol("signing", format!("invalid share material: {err}")))?;
        let message = Message::from_digest(*digest.as_bytes());
        let signature = self.secp.sign_ecdsa_recoverable(&message, &secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        Ok(EcdsaSignature { r, s, recovery_id: recovery_id.to_i32() as u8 })
    }

    async fn announce_signer_presence(&self, _keep_id: &KeepId, members: &[OperatorAddress]) -> Result<Vec<MemberId>> {
        sleep(PROTOCOL_ROUND_DELAY).await;
        Ok(members.iter().map(Self::member_id_for).collect())
    }
}
