use crate::fixtures::keep_id;
use keep_node::domain::KeepSigner;
use keep_node::foundation::GroupPublicKey;
use keep_node::infrastructure::persistence::{DiskPersistence, Persistence};
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
fn signers_survive_a_process_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let persistence = Arc::new(DiskPersistence::open(dir.path()).expect("open"));
        let registry = KeepsRegistry::new(persistence);
        registry.register(signer(1)).expect("register 1");
        registry.register(signer(2)).expect("register 2");
    }

    let persistence = Arc::new(DiskPersistence::open(dir.path()).expect("reopen"));
    let registry = KeepsRegistry::new(persistence);
    let mut loaded = registry.load_existing().expect("load");
    loaded.sort();

    assert_eq!(loaded, vec![keep_id(1), keep_id(2)]);
    assert_eq!(registry.get_signer(&keep_id(1)).expect("get"), signer(1));
    assert_eq!(registry.get_signer(&keep_id(2)).expect("get"), signer(2));
}

#[test]
fn archived_snapshots_leave_the_active_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let persistence = DiskPersistence::open(dir.path()).expect("open");

    persistence.save(&keep_id(1), b"snapshot").expect("save");
    assert!(persistence.has(&keep_id(1)).expect("has"));

    persistence.archive(&keep_id(1)).expect("archive");
    assert!(!persistence.has(&keep_id(1)).expect("has after archive"));
    assert!(persistence.load_all().expect("load").is_empty());

    // Repeating the archive is harmless.
    persistence.archive(&keep_id(1)).expect("repeated archive");
}

#[test]
fn save_replaces_the_snapshot_atomically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let persistence = DiskPersistence::open(dir.path()).expect("open");

    persistence.save(&keep_id(1), b"first").expect("save first");
    persistence.save(&keep_id(1), b"second").expect("save second");

    let snapshots = persistence.load_all().expect("load");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].1, b"second");
}
