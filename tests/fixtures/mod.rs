//! Shared test fixtures: a node wired over the local chain with the mock
//! TSS engine, plus small helpers for waiting and peer simulation.
#![allow(dead_code)]

use keep_node::application::NodeController;
use keep_node::domain::RecoveryAnnouncement;
use keep_node::foundation::{Digest, KeepId, OperatorAddress};
use keep_node::infrastructure::chain::local::{LocalChain, LocalTbtcApplication};
use keep_node::infrastructure::chain::{FundingInfo, HostChain, TbtcApplication};
use keep_node::infrastructure::config::NodeConfig;
use keep_node::infrastructure::persistence::{MemoryPersistence, Persistence};
use keep_node::infrastructure::transport::{BroadcastNetwork, MemoryBroadcastNetwork};
use keep_node::infrastructure::tss::{MockTssEngine, TssEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const ZPUB: &str = "zpub6rePDVHfRP14VpYiejwepBhzu45UbvqvzE3ZMdDnNykG47mZYyGTjsuq6uzQYRakSrHyix1YTXKohag4GDZLcHcLvhSAs2MQNF8VDaZuQT9";
pub const XPUB: &str = "xpub6Cg41S21VrxkW1WBTZJn95KNpHozP2Xc6AhG27ZcvZvH8XyNzunEqLdk9dxyXQUoy7ALWQFNn5K1me74aEMtS6pUgNDuCYTTMsJzCAk9sk1";
pub const YPUB: &str = "ypub6Xxan668aiJqvh4SVfd7EzqjWvf36gWufTkhWHv3gaxnBh44HpkTi2TTkm1u136qjUxk7F3jGzoyfrGpHvALMgJgbF4WNXpoPu3QYrqogMK";

pub fn operator(tag: u8) -> OperatorAddress {
    OperatorAddress::new([tag; 20])
}

pub fn keep_id(tag: u8) -> KeepId {
    KeepId::new([tag; 20])
}

pub fn digest(tag: u8) -> Digest {
    Digest::new([tag; 32])
}

pub fn test_funding() -> FundingInfo {
    FundingInfo {
        outpoint_txid_hex: "c6dcb5e8d22a5a1e1029b10cfbe1857db2a1e4a5b52b7d923438f377aafcbcfd".to_string(),
        outpoint_index: 0,
        value_sats: 1_000_000,
    }
}

pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.bitcoin.beneficiary_address = ZPUB.to_string();
    config.bitcoin.max_fee_per_vbyte = 40;
    config
}

pub struct TestNode {
    pub controller: NodeController,
    pub chain: LocalChain,
    pub engine: Arc<MockTssEngine>,
    pub persistence: Arc<MemoryPersistence>,
    pub broadcast: Arc<MemoryBroadcastNetwork>,
}

/// Builds a node over the given chain without starting any background
/// activity; callers drive coordinators by hand.
pub async fn init_node(chain: LocalChain, persistence: Arc<MemoryPersistence>, config: NodeConfig) -> TestNode {
    let identity = MockTssEngine::identity_for(chain.operator_address());
    let engine = Arc::new(MockTssEngine::new(identity.clone()));
    let broadcast = Arc::new(MemoryBroadcastNetwork::new());

    let chain_dyn: Arc<dyn HostChain> = Arc::new(chain.clone());
    let tss_dyn: Arc<dyn TssEngine> = engine.clone();
    let broadcast_dyn: Arc<dyn BroadcastNetwork> = broadcast.clone();
    let tbtc_dyn: Arc<dyn TbtcApplication> = Arc::new(LocalTbtcApplication::new(test_funding()));
    let persistence_dyn: Arc<dyn Persistence> = persistence.clone();

    let controller =
        NodeController::initialize(config, identity, chain_dyn, tss_dyn, broadcast_dyn, Some(tbtc_dyn), persistence_dyn)
            .await
            .expect("node initialization");

    TestNode { controller, chain, engine, persistence, broadcast }
}

/// Builds and starts a node: reconciliation, the key-generation scan and
/// the keep-creation subscription are live once this returns.
pub async fn start_node(chain: LocalChain, persistence: Arc<MemoryPersistence>, config: NodeConfig) -> TestNode {
    let node = init_node(chain, persistence, config).await;
    node.controller.run().await.expect("node startup");
    node
}

/// Advances the chain by one block per tick so confirmation waits resolve.
pub fn spawn_miner(chain: LocalChain, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            chain.advance_blocks(1);
        }
    })
}

/// Re-sends a peer's recovery announcement until aborted, standing in for
/// the real channel's periodic retransmission.
pub fn spawn_peer_announcer(
    broadcast: Arc<MemoryBroadcastNetwork>,
    keep: KeepId,
    peer: OperatorAddress,
    beneficiary: &str,
    max_fee_per_vbyte: i32,
) -> JoinHandle<()> {
    let announcement = RecoveryAnnouncement {
        sender_member_id: MockTssEngine::member_id_for(&peer),
        btc_recovery_address: beneficiary.to_string(),
        max_fee_per_vbyte,
    };
    tokio::spawn(async move {
        let channel = broadcast.channel(&keep).await.expect("broadcast channel");
        loop {
            channel.send(&announcement).await.expect("announcement send");
            sleep(Duration::from_millis(50)).await;
        }
    })
}

pub async fn wait_until(mut condition: impl FnMut() -> bool, deadline: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
