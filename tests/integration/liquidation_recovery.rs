//! Every member of a terminated keep must independently assemble the same
//! sweep transaction from the announced beneficiaries.

use crate::fixtures::{keep_id, operator, test_config, test_funding, XPUB, YPUB, ZPUB};
use keep_node::application::{run_liquidation_recovery, RecoveryResult};
use keep_node::domain::GroupParameters;
use keep_node::foundation::{KeepId, OperatorAddress};
use keep_node::infrastructure::chain::local::{LocalChain, LocalTbtcApplication};
use keep_node::infrastructure::chain::HostChain;
use keep_node::infrastructure::transport::MemoryBroadcastNetwork;
use keep_node::infrastructure::tss::{MockTssEngine, TssEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

async fn run_member(
    chain: LocalChain,
    keep: KeepId,
    members: Vec<OperatorAddress>,
    broadcast: Arc<MemoryBroadcastNetwork>,
    tbtc: Arc<LocalTbtcApplication>,
    address: OperatorAddress,
    beneficiary: String,
    max_fee_per_vbyte: i32,
) -> RecoveryResult {
    let identity = MockTssEngine::identity_for(address);
    let engine = MockTssEngine::new(identity.clone());
    let group = GroupParameters::new(members, 3);
    let signer = engine.generate_signer(&keep, &group).await.expect("keygen");

    let mut config = test_config();
    config.bitcoin.beneficiary_address = beneficiary;
    config.bitcoin.max_fee_per_vbyte = max_fee_per_vbyte;

    let handle = chain.keep(&keep).await.expect("keep handle");
    run_liquidation_recovery(
        &chain,
        handle.as_ref(),
        &signer,
        &engine,
        broadcast.as_ref(),
        tbtc.as_ref(),
        &identity,
        &config,
    )
    .await
    .expect("recovery")
}

#[tokio::test]
async fn members_build_identical_sweeps_with_the_minimum_fee() {
    let chain = LocalChain::new(operator(1));
    let keep = keep_id(0x77);
    let members = vec![operator(1), operator(2), operator(3)];
    chain.create_keep(keep, members.clone(), 3).expect("create keep");

    let broadcast = Arc::new(MemoryBroadcastNetwork::new());
    let tbtc = Arc::new(LocalTbtcApplication::new(test_funding()));

    // Subscription timing differs between members; re-sending every frame
    // stands in for the channel's periodic retransmission.
    let beneficiaries = [(operator(1), ZPUB, 40), (operator(2), XPUB, 30), (operator(3), YPUB, 35)];
    let announcers: Vec<_> = beneficiaries
        .iter()
        .map(|(member, beneficiary, fee)| {
            crate::fixtures::spawn_peer_announcer(Arc::clone(&broadcast), keep, *member, beneficiary, *fee)
        })
        .collect();
    sleep(Duration::from_millis(20)).await;

    let runs: Vec<_> = beneficiaries
        .iter()
        .map(|(member, beneficiary, fee)| {
            tokio::spawn(run_member(
                chain.clone(),
                keep,
                members.clone(),
                Arc::clone(&broadcast),
                Arc::clone(&tbtc),
                *member,
                beneficiary.to_string(),
                *fee,
            ))
        })
        .collect();

    let mut results = Vec::new();
    for run in runs {
        results.push(run.await.expect("member run"));
    }
    for announcer in announcers {
        announcer.abort();
    }

    let expected_addresses = vec![
        "1MjCqoLqMZ6Ru64TTtP16XnpSdiE8Kpgcx".to_string(),
        "3Aobe26f7QzKN73mvYQVbt1KLrCU1CgQpD".to_string(),
        "bc1q46uejlhm9vkswfcqs9plvujzzmqjvtfda3mra6".to_string(),
    ];
    for result in &results {
        assert_eq!(result.fee_per_vbyte, 30, "the minimum announced fee wins");
        assert_eq!(result.derived_addresses, expected_addresses, "derived outputs sorted lexicographically");
    }

    // All members assemble byte-identical transactions.
    let reference = &results[0];
    for result in &results[1..] {
        assert_eq!(result.unsigned_transaction, reference.unsigned_transaction);
        assert_eq!(result.signed_transaction_hex, reference.signed_transaction_hex);
    }

    // vsize 176 at 30 sat/vB leaves an equal share per member.
    let fee = 176 * 30;
    let share = (test_funding().value_sats - fee) / 3;
    for output in &reference.unsigned_transaction.output {
        assert_eq!(output.value.to_sat(), share);
    }
}
