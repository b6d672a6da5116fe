use crate::fixtures::{keep_id, operator, spawn_miner, spawn_peer_announcer, start_node, test_config, wait_until, XPUB, YPUB};
use keep_node::domain::KeepState;
use keep_node::infrastructure::chain::local::LocalChain;
use keep_node::infrastructure::persistence::MemoryPersistence;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn confirmed_close_archives_the_keep() {
    let chain = LocalChain::new(operator(1));
    let persistence = Arc::new(MemoryPersistence::new());
    let node = start_node(chain.clone(), Arc::clone(&persistence), test_config()).await;
    let miner = spawn_miner(chain.clone(), Duration::from_millis(20));

    let keep = keep_id(0x11);
    chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");
    assert!(wait_until(|| chain.public_key_of(&keep).expect("public key").is_some(), Duration::from_secs(10)).await);

    chain.close_keep(&keep).expect("close keep");
    assert_eq!(chain.state_of(&keep).expect("state"), KeepState::Closed);

    let registry = node.controller.context().registry.clone();
    assert!(
        wait_until(|| !registry.has_signer(&keep), Duration::from_secs(10)).await,
        "confirmed close must unregister the signer"
    );
    assert_eq!(persistence.archived_count(), 1);
    miner.abort();
}

#[tokio::test]
async fn unconfirmed_close_keeps_the_signer() {
    let chain = LocalChain::new(operator(1));
    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    let keep = keep_id(0x22);
    chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");
    assert!(wait_until(|| chain.public_key_of(&keep).expect("public key").is_some(), Duration::from_secs(10)).await);

    // The close observation does not survive the confirmation window.
    chain.close_keep(&keep).expect("close keep");
    chain.reactivate_keep(&keep).expect("reactivate");
    chain.advance_blocks(12);

    sleep(Duration::from_millis(500)).await;
    assert!(node.controller.context().registry.has_signer(&keep), "keep must stay registered");
}

#[tokio::test]
async fn confirmed_termination_runs_recovery_and_archives() {
    let chain = LocalChain::new(operator(1));
    let persistence = Arc::new(MemoryPersistence::new());
    let node = start_node(chain.clone(), Arc::clone(&persistence), test_config()).await;
    let miner = spawn_miner(chain.clone(), Duration::from_millis(20));

    let keep = keep_id(0x33);
    chain.create_keep(keep, vec![operator(1), operator(2), operator(3)], 3).expect("create keep");
    assert!(wait_until(|| chain.public_key_of(&keep).expect("public key").is_some(), Duration::from_secs(10)).await);

    // Peer members keep announcing their beneficiaries, as the broadcast
    // channel's retransmission would.
    let announcers = vec![
        spawn_peer_announcer(Arc::clone(&node.broadcast), keep, operator(2), XPUB, 30),
        spawn_peer_announcer(Arc::clone(&node.broadcast), keep, operator(3), YPUB, 35),
    ];

    chain.terminate_keep(&keep).expect("terminate keep");
    assert_eq!(chain.state_of(&keep).expect("state"), KeepState::Terminated);

    let registry = node.controller.context().registry.clone();
    assert!(
        wait_until(|| !registry.has_signer(&keep), Duration::from_secs(15)).await,
        "termination must archive the keep after recovery"
    );
    assert_eq!(persistence.archived_count(), 1);
    // Recovery signs the sweep sighash on top of nothing else in this flow.
    assert_eq!(node.engine.sign_count(), 1);

    for announcer in announcers {
        announcer.abort();
    }
    miner.abort();
}
