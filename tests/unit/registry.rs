use crate::fixtures::keep_id;
use keep_node::domain::KeepSigner;
use keep_node::foundation::{GroupPublicKey, NodeError};
use keep_node::infrastructure::persistence::{MemoryPersistence, Persistence};
use keep_node::infrastructure::registry::KeepsRegistry;
use std::sync::Arc;

fn signer(tag: u8) -> KeepSigner {
    KeepSigner {
        keep_id: keep_id(tag),
        member_index: u32::from(tag),
        share: vec![tag; 32],
        group_public_key: GroupPublicKey::new([tag; 64]),
    }
}

#[test]
fn registered_signer_is_returned_identically() {
    let registry = KeepsRegistry::new(Arc::new(MemoryPersistence::new()));
    let original = signer(1);
    registry.register(original.clone()).expect("register");

    assert!(registry.has_signer(&keep_id(1)));
    assert_eq!(registry.get_signer(&keep_id(1)).expect("get"), original);
    assert_eq!(registry.keep_ids(), vec![keep_id(1)]);
}

#[test]
fn duplicate_registration_is_refused() {
    let registry = KeepsRegistry::new(Arc::new(MemoryPersistence::new()));
    registry.register(signer(1)).expect("first registration");

    let err = registry.register(signer(1)).expect_err("duplicate registration");
    assert!(matches!(err, NodeError::DuplicateSigner(_)));
}

#[test]
fn unregister_archives_and_is_idempotent() {
    let persistence = Arc::new(MemoryPersistence::new());
    let registry = KeepsRegistry::new(Arc::clone(&persistence) as Arc<dyn Persistence>);
    registry.register(signer(1)).expect("register");

    registry.unregister(&keep_id(1)).expect("unregister");
    assert!(!registry.has_signer(&keep_id(1)));
    assert_eq!(persistence.archived_count(), 1);
    assert!(matches!(registry.get_signer(&keep_id(1)), Err(NodeError::SignerNotFound(_))));

    registry.unregister(&keep_id(1)).expect("repeated unregister");
    assert_eq!(persistence.archived_count(), 1);
}

#[test]
fn load_existing_restores_signers_from_storage() {
    let persistence = Arc::new(MemoryPersistence::new());
    {
        let registry = KeepsRegistry::new(Arc::clone(&persistence) as Arc<dyn Persistence>);
        registry.register(signer(1)).expect("register 1");
        registry.register(signer(2)).expect("register 2");
    }

    // A fresh registry over the same storage models a process restart.
    let restarted = KeepsRegistry::new(persistence);
    let mut loaded = restarted.load_existing().expect("load");
    loaded.sort();
    assert_eq!(loaded, vec![keep_id(1), keep_id(2)]);
    assert_eq!(restarted.get_signer(&keep_id(2)).expect("get"), signer(2));
}
