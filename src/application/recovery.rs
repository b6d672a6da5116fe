//! Liquidation recovery.
//!
//! When a keep is terminated, its members return the custodied bitcoin to
//! themselves: every member announces a beneficiary address and a fee cap
//! over the keep-scoped broadcast channel, and once the set is complete each
//! member independently builds the identical sweep transaction and
//! threshold-signs it. The signed transaction is logged for out-of-band
//! broadcast; this node never broadcasts it.

use crate::domain::{AnnouncementSet, KeepSigner, RecoveryAnnouncement};
use crate::foundation::{KeepId, MemberId, NodeError, OperatorIdentity, Result};
use crate::infrastructure::btc;
use crate::infrastructure::chain::{HostChain, KeepHandle, TbtcApplication};
use crate::infrastructure::config::NodeConfig;
use crate::infrastructure::retry::run_with_retry;
use crate::infrastructure::transport::{BroadcastChannel, BroadcastNetwork};
use crate::infrastructure::tss::TssEngine;
use bitcoin::Transaction;
use log::{error, info, warn};
use std::time::Duration;
use tokio::time::sleep;

/// How long members wait for the full announcement set before giving up.
const ANNOUNCEMENT_DEADLINE: Duration = Duration::from_secs(2 * 60);

/// Beneficiary extended keys are derived at a fixed index so every member
/// computes the same output set.
const RECOVERY_DERIVATION_INDEX: u32 = 0;

/// The signed-transaction line is the only copy of the sweep; repeat it so
/// it survives log truncation.
const SIGNED_TRANSACTION_LOG_REPEATS: usize = 5;

#[derive(Clone, Debug)]
pub struct RecoveryResult {
    pub unsigned_transaction: Transaction,
    pub signed_transaction_hex: String,
    pub fee_per_vbyte: i32,
    pub derived_addresses: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_liquidation_recovery(
    chain: &dyn HostChain,
    keep: &dyn KeepHandle,
    signer: &KeepSigner,
    tss: &dyn TssEngine,
    broadcast: &dyn BroadcastNetwork,
    tbtc: &dyn TbtcApplication,
    operator: &OperatorIdentity,
    config: &NodeConfig,
) -> Result<RecoveryResult> {
    let keep_id = keep.id();
    let btc_network = config.bitcoin_network()?;

    let members = keep.members().await?;
    let member_ids = tss.announce_signer_presence(&keep_id, &members).await?;

    let channel = broadcast.channel(&keep_id).await?;
    let own_announcement = RecoveryAnnouncement {
        sender_member_id: operator.public_key.clone(),
        btc_recovery_address: config.bitcoin.beneficiary_address.clone(),
        max_fee_per_vbyte: config.bitcoin.max_fee_per_vbyte,
    };
    let announcements =
        broadcast_recovery_addresses(chain, channel.as_ref(), &keep_id, own_announcement, member_ids).await?;

    let mut raw_addresses = Vec::with_capacity(announcements.len());
    for (member, address) in announcements.raw_addresses() {
        btc::validate_address(&address, btc_network).map_err(|err| {
            NodeError::protocol(
                "recovery address validation",
                format!("address [{address}] received from member [{member}] is invalid: {err}"),
            )
        })?;
        raw_addresses.push(address);
    }
    let fee_per_vbyte = announcements.min_fee_per_vbyte();

    let mut derived_addresses = Vec::with_capacity(raw_addresses.len());
    for raw_address in &raw_addresses {
        let derived = btc::derive_address(raw_address, RECOVERY_DERIVATION_INDEX).map_err(|err| {
            NodeError::protocol(
                "recovery address derivation",
                format!("unable to derive btc address for keep [{keep_id}] and address [{raw_address}]: {err}"),
            )
        })?;
        derived_addresses.push(derived);
    }
    // Identical ordering on every member makes the transactions byte-identical.
    derived_addresses.sort();

    let deposit = keep.owner().await?;
    let funding = tbtc.funding_info(&deposit).await?;
    info!(
        "building liquidation sweep keep={keep_id} outpoint={}:{} value_sats={} fee_per_vbyte={fee_per_vbyte} outputs={}",
        funding.outpoint_txid_hex,
        funding.outpoint_index,
        funding.value_sats,
        derived_addresses.len()
    );

    let unsigned_transaction = btc::construct_unsigned_transaction(
        &funding.outpoint_txid_hex,
        funding.outpoint_index,
        funding.value_sats,
        i64::from(fee_per_vbyte),
        &derived_addresses,
        btc_network,
    )?;

    let script_code = btc::p2wpkh_script_code(&signer.group_public_key)?;
    let sighash = btc::witness_sighash(&unsigned_transaction, &script_code, funding.value_sats)?;

    let signature = run_with_retry(config.signing_timeout(), || async move { tss.sign(signer, &sighash).await }).await?;

    let signed_transaction_hex = btc::build_signed_transaction_hex(&unsigned_transaction, &signature, &signer.group_public_key)?;
    for _ in 0..SIGNED_TRANSACTION_LOG_REPEATS {
        warn!("please broadcast Bitcoin transaction {signed_transaction_hex}");
    }

    Ok(RecoveryResult { unsigned_transaction, signed_transaction_hex, fee_per_vbyte, derived_addresses })
}

/// Collects one announcement from every group member.
///
/// Our own frame goes out immediately (the channel retransmits it for the
/// lifetime of the protocol) and once more when the set completes, for
/// members that joined late. Completion and deadline expiry are distinct
/// outcomes: the latter names every silent member.
async fn broadcast_recovery_addresses(
    chain: &dyn HostChain,
    channel: &dyn BroadcastChannel,
    keep_id: &KeepId,
    own_announcement: RecoveryAnnouncement,
    member_ids: Vec<MemberId>,
) -> Result<AnnouncementSet> {
    let mut subscription = channel.subscribe().await?;
    let mut announcements = AnnouncementSet::new(member_ids);
    announcements.insert(own_announcement.clone());
    channel.send(&own_announcement).await?;

    if announcements.is_complete() {
        channel.send(&own_announcement).await?;
        return Ok(announcements);
    }

    let deadline = sleep(ANNOUNCEMENT_DEADLINE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                for member in announcements.missing_members() {
                    let address = chain.pubkey_to_address(member);
                    error!(
                        "member address={address} has not supplied a btc recovery address for keep={keep_id}; \
                         check if the keep client for that operator is active and connected"
                    );
                }
                return Err(NodeError::Timeout {
                    operation: "waiting for btc recovery addresses".to_string(),
                    seconds: ANNOUNCEMENT_DEADLINE.as_secs(),
                });
            }
            frame = subscription.next() => {
                match frame {
                    None => return Err(NodeError::transport("recovery broadcast", "channel closed")),
                    Some(Err(err)) => {
                        warn!("recovery broadcast receive failed keep={keep_id} error={err}");
                    }
                    Some(Ok(announcement)) => {
                        let sender = announcement.sender_member_id.clone();
                        let address = announcement.btc_recovery_address.clone();
                        let fee = announcement.max_fee_per_vbyte;
                        if announcements.insert(announcement) {
                            info!(
                                "member={} from keep={keep_id} announced btc address={address} for liquidation \
                                 recovery with a max fee of {fee}",
                                chain.pubkey_to_address(&sender)
                            );
                        }
                        if announcements.is_complete() {
                            info!("successfully gathered all btc recovery addresses for keep={keep_id}");
                            channel.send(&own_announcement).await?;
                            return Ok(announcements);
                        }
                    }
                }
            }
        }
    }
}
