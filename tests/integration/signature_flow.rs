use crate::fixtures::{digest, keep_id, operator, init_node, spawn_miner, start_node, test_config, wait_until};
use keep_node::application::KeepCoordinator;
use keep_node::domain::GroupParameters;
use keep_node::infrastructure::chain::local::LocalChain;
use keep_node::infrastructure::chain::HostChain;
use keep_node::infrastructure::persistence::MemoryPersistence;
use keep_node::infrastructure::tss::TssEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn requested_signature_is_confirmed_signed_and_submitted() {
    let chain = LocalChain::new(operator(1));
    let node = start_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;
    let miner = spawn_miner(chain.clone(), Duration::from_millis(20));

    let keep = keep_id(0x11);
    chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");
    assert!(wait_until(|| chain.public_key_of(&keep).expect("public key").is_some(), Duration::from_secs(10)).await);

    chain.request_signature(&keep, digest(0xAB)).expect("request signature");

    assert!(
        wait_until(
            || chain.submitted_signatures(&keep).expect("submitted").len() == 1,
            Duration::from_secs(10)
        )
        .await,
        "signature must be submitted after twelve confirmations"
    );
    assert_eq!(node.engine.sign_count(), 1);
    miner.abort();
}

#[tokio::test]
async fn duplicate_delivery_signs_exactly_once() {
    let chain = LocalChain::new(operator(1));
    let node = init_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;
    let ctx = node.controller.context();

    let keep = keep_id(0x22);
    let members = vec![operator(1), operator(2)];
    chain.create_keep(keep, members.clone(), 2).expect("create keep");
    let handle = chain.keep(&keep).await.expect("keep handle");

    let signer = node
        .engine
        .generate_signer(&keep, &GroupParameters::new(members, 2))
        .await
        .expect("keygen");
    ctx.registry.register(signer.clone()).expect("register");
    handle.submit_public_key(&signer.group_public_key).await.expect("submit public key");

    let requested = digest(0xAB);
    let start_block = chain.block();
    chain.request_signature(&keep, requested).expect("request signature");

    // The same event delivered twice: once live, once as a reorg retry.
    let coordinator = KeepCoordinator::new(Arc::clone(&ctx), handle);
    let first = {
        let coordinator = Arc::clone(&coordinator);
        let signer = signer.clone();
        tokio::spawn(async move { coordinator.handle_signature_request(&signer, requested, start_block).await })
    };
    let second = {
        let coordinator = Arc::clone(&coordinator);
        let signer = signer.clone();
        tokio::spawn(async move { coordinator.handle_signature_request(&signer, requested, start_block).await })
    };

    sleep(Duration::from_millis(100)).await;
    chain.advance_blocks(12);

    first.await.expect("join").expect("first handler");
    second.await.expect("join").expect("second handler");

    assert_eq!(node.engine.sign_count(), 1, "exactly one signing protocol run");
    assert_eq!(chain.submitted_signatures(&keep).expect("submitted").len(), 1);
}

#[tokio::test]
async fn reorged_request_is_abandoned_silently() {
    let chain = LocalChain::new(operator(1));
    let node = init_node(chain.clone(), Arc::new(MemoryPersistence::new()), test_config()).await;
    let ctx = node.controller.context();

    let keep = keep_id(0x33);
    let members = vec![operator(1), operator(2)];
    chain.create_keep(keep, members.clone(), 2).expect("create keep");
    let handle = chain.keep(&keep).await.expect("keep handle");

    let signer = node
        .engine
        .generate_signer(&keep, &GroupParameters::new(members, 2))
        .await
        .expect("keygen");
    ctx.registry.register(signer.clone()).expect("register");
    handle.submit_public_key(&signer.group_public_key).await.expect("submit public key");

    let requested = digest(0xCD);
    let start_block = chain.block();
    chain.request_signature(&keep, requested).expect("request signature");

    let coordinator = KeepCoordinator::new(Arc::clone(&ctx), handle);
    let handler = {
        let coordinator = Arc::clone(&coordinator);
        let signer = signer.clone();
        tokio::spawn(async move { coordinator.handle_signature_request(&signer, requested, start_block).await })
    };

    // The handler is waiting out the confirmation window when the request
    // disappears in a reorg.
    sleep(Duration::from_millis(100)).await;
    chain.clear_awaiting(&keep, &requested).expect("clear awaiting");
    chain.advance_blocks(12);

    handler.await.expect("join").expect("handler exits cleanly");
    assert_eq!(node.engine.sign_count(), 0, "no signing protocol run after a reorg");
    assert!(chain.submitted_signatures(&keep).expect("submitted").is_empty());
}

#[tokio::test]
async fn missed_request_is_caught_after_restart() {
    let chain = LocalChain::new(operator(1));
    let persistence = Arc::new(MemoryPersistence::new());

    let keep = keep_id(0x44);
    {
        let node = start_node(chain.clone(), Arc::clone(&persistence), test_config()).await;
        chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");
        assert!(wait_until(|| chain.public_key_of(&keep).expect("public key").is_some(), Duration::from_secs(10)).await);
        node.controller.shutdown();
        node.engine.shutdown();
    }

    // The request fires while the node is down.
    chain.request_signature(&keep, digest(0xEE)).expect("request signature");

    let miner = spawn_miner(chain.clone(), Duration::from_millis(20));
    let restarted = start_node(chain.clone(), persistence, test_config()).await;

    assert!(
        wait_until(
            || chain.submitted_signatures(&keep).expect("submitted").len() == 1,
            Duration::from_secs(10)
        )
        .await,
        "startup probe must drive the missed request through the pipeline"
    );
    assert_eq!(restarted.engine.sign_count(), 1);
    miner.abort();
}
