use crate::fixtures::{digest, keep_id, operator};
use keep_node::application::EventDeduplicator;
use keep_node::domain::KeepSigner;
use keep_node::foundation::GroupPublicKey;
use keep_node::infrastructure::chain::local::LocalChain;
use keep_node::infrastructure::chain::HostChain;
use keep_node::infrastructure::persistence::MemoryPersistence;
use keep_node::infrastructure::registry::KeepsRegistry;
use std::sync::Arc;
use std::time::Duration;

fn deduplicator() -> (EventDeduplicator, Arc<KeepsRegistry>) {
    let registry = Arc::new(KeepsRegistry::new(Arc::new(MemoryPersistence::new())));
    (EventDeduplicator::new(Arc::clone(&registry), Duration::from_secs(5)), registry)
}

#[tokio::test]
async fn closing_guard_admits_one_handler_until_completed() {
    let (dedup, _) = deduplicator();
    let keep = keep_id(1);

    assert!(dedup.notify_closing_started(&keep).await);
    assert!(!dedup.notify_closing_started(&keep).await);

    dedup.notify_closing_completed(&keep).await;
    assert!(dedup.notify_closing_started(&keep).await);
}

#[tokio::test]
async fn closing_and_terminating_guards_are_independent() {
    let (dedup, _) = deduplicator();
    let keep = keep_id(1);

    assert!(dedup.notify_closing_started(&keep).await);
    assert!(dedup.notify_terminating_started(&keep).await);
}

#[tokio::test]
async fn keygen_guard_refuses_when_signer_already_persisted() {
    let (dedup, registry) = deduplicator();
    let keep = keep_id(1);

    assert!(dedup.notify_keygen_started(&keep).await);
    dedup.notify_keygen_completed(&keep).await;

    registry
        .register(KeepSigner {
            keep_id: keep,
            member_index: 0,
            share: vec![1; 32],
            group_public_key: GroupPublicKey::new([1; 64]),
        })
        .expect("register");

    // Completed generation is memoized through the registry, not in memory.
    assert!(!dedup.notify_keygen_started(&keep).await);
}

#[tokio::test]
async fn signing_guard_checks_the_chain_for_the_exact_digest() {
    let (dedup, _) = deduplicator();
    let chain = LocalChain::new(operator(1));
    let keep = keep_id(1);
    chain.create_keep(keep, vec![operator(1), operator(2)], 2).expect("create keep");

    let handle = chain.keep(&keep).await.expect("keep handle");
    handle.submit_public_key(&GroupPublicKey::new([9; 64])).await.expect("public key");

    let requested = digest(0xAB);
    let never_requested = digest(0xCD);
    chain.request_signature(&keep, requested).expect("request signature");

    assert!(dedup.notify_signing_started(handle.as_ref(), &requested).await.expect("first check"));
    assert!(!dedup.notify_signing_started(handle.as_ref(), &requested).await.expect("duplicate check"));
    assert!(!dedup.notify_signing_started(handle.as_ref(), &never_requested).await.expect("unknown digest"));

    dedup.notify_signing_completed(&keep, &requested).await;
    assert!(dedup.notify_signing_started(handle.as_ref(), &requested).await.expect("after completion"));
}
