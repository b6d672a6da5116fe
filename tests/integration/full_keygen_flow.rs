use crate::fixtures::{keep_id, operator, start_node, test_config, wait_until};
use keep_node::domain::KeepState;
use keep_node::foundation::now_secs;
use keep_node::infrastructure::chain::local::LocalChain;
use keep_node::infrastructure::persistence::MemoryPersistence;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn member_generates_key_for_created_keep() {
    let chain = LocalChain::new(operator(1));
    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    let keep = keep_id(0x11);
    chain.create_keep(keep, vec![operator(1), operator(2), operator(3)], 3).expect("create keep");
    assert_eq!(chain.state_of(&keep).expect("state"), KeepState::AwaitingKey);

    assert!(
        wait_until(|| chain.public_key_of(&keep).expect("read public key").is_some(), Duration::from_secs(10)).await,
        "group public key must be submitted on-chain"
    );
    assert_eq!(chain.state_of(&keep).expect("state"), KeepState::Active);
    let registry = node.controller.context().registry.clone();
    assert!(registry.has_signer(&keep));

    // The engine's pre-params pool keeps refilling in the background.
    assert!(wait_until(|| node.controller.pre_params_pool_size() > 0, Duration::from_secs(10)).await);
}

#[tokio::test]
async fn non_member_keep_is_ignored() {
    let chain = LocalChain::new(operator(1));
    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    let keep = keep_id(0x22);
    chain.create_keep(keep, vec![operator(7), operator(8)], 2).expect("create keep");

    sleep(Duration::from_millis(300)).await;
    assert!(chain.public_key_of(&keep).expect("read public key").is_none());
    assert!(!node.controller.context().registry.has_signer(&keep));
}

#[tokio::test]
async fn unsupported_group_shape_is_refused() {
    let chain = LocalChain::new(operator(1));
    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    // Honest threshold below group size is not supported.
    let partial = keep_id(0x33);
    chain.create_keep(partial, vec![operator(1), operator(2), operator(3)], 2).expect("create keep");

    // Single-member groups are not supported either.
    let solo = keep_id(0x44);
    chain.create_keep(solo, vec![operator(1)], 1).expect("create keep");

    sleep(Duration::from_millis(300)).await;
    for keep in [partial, solo] {
        assert!(chain.public_key_of(&keep).expect("read public key").is_none());
        assert!(!node.controller.context().registry.has_signer(&keep));
    }
}

#[tokio::test]
async fn startup_scan_generates_key_for_recent_unkeyed_keep() {
    let chain = LocalChain::new(operator(1));

    // Keep created before the node subscribes; only the scan can find it.
    let keep = keep_id(0x55);
    chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");

    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    assert!(
        wait_until(|| chain.public_key_of(&keep).expect("read public key").is_some(), Duration::from_secs(10)).await,
        "scan must start key generation for the unkeyed keep"
    );
    assert!(node.controller.context().registry.has_signer(&keep));
}

#[tokio::test]
async fn startup_scan_stops_at_the_lookback_window() {
    let chain = LocalChain::new(operator(1));

    let stale = keep_id(0x66);
    chain.create_keep(stale, vec![operator(1), operator(2)], 2).expect("create keep");
    let lookback = test_config().awaiting_key_generation_lookback().as_secs();
    chain.set_opened_at(&stale, now_secs().saturating_sub(lookback * 2)).expect("set opened at");

    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;

    sleep(Duration::from_millis(300)).await;
    assert!(chain.public_key_of(&stale).expect("read public key").is_none());
    assert!(!node.controller.context().registry.has_signer(&stale));
}
