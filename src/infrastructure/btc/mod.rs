//! Bitcoin helper: extended-public-key address derivation, sweep-transaction
//! construction and BIP-143 signing support for liquidation recovery.
//!
//! Beneficiaries announce extended public keys (or plain addresses); the
//! sweep pays the address derived at a fixed index so funds land on a fresh
//! key. Only public derivation is possible here, which is the point.

use crate::foundation::{Digest, EcdsaSignature, GroupPublicKey, NodeError, Result};
use bitcoin::address::NetworkUnchecked;
use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::{
    absolute, transaction, Address, Amount, CompressedPublicKey, EcdsaSighashType, Network, OutPoint, PublicKey,
    Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use secp256k1::Secp256k1;

const SERIALIZED_EXTENDED_KEY_LENGTH: usize = 78;
const HARDENED_INDEX_START: u32 = 0x8000_0000;

/// Extended keys deeper than the account/chain level cannot be extrapolated
/// to a standard receive path.
const MAX_EXTENDED_KEY_DEPTH: u8 = 4;

const VERSION_XPUB: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
const VERSION_YPUB: [u8; 4] = [0x04, 0x9D, 0x7C, 0xB2];
const VERSION_ZPUB: [u8; 4] = [0x04, 0xB2, 0x47, 0x46];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddressScheme {
    /// BIP-44 legacy pay-to-pubkey-hash.
    P2pkh,
    /// BIP-49 / BIP-141 P2WPKH nested in P2SH.
    P2shWpkh,
    /// BIP-84 native segwit.
    P2wpkh,
}

fn parse_extended_public_key(extended_address: &str) -> Result<(Xpub, AddressScheme)> {
    let mut data = base58::decode_check(extended_address).map_err(|err| {
        NodeError::bitcoin("extended key parse", format!("error parsing extended public key: [{err}]"))
    })?;
    if data.len() != SERIALIZED_EXTENDED_KEY_LENGTH {
        return Err(NodeError::bitcoin(
            "extended key parse",
            "error parsing extended public key: [the provided serialized extended key length is invalid]",
        ));
    }

    let scheme = if data[0..4] == VERSION_XPUB {
        AddressScheme::P2pkh
    } else if data[0..4] == VERSION_YPUB {
        AddressScheme::P2shWpkh
    } else if data[0..4] == VERSION_ZPUB {
        AddressScheme::P2wpkh
    } else {
        return Err(NodeError::bitcoin("extended key parse", "unsupported public key format"));
    };

    // Re-label as xpub so the BIP-32 decoder accepts ypub/zpub payloads; the
    // original version bytes only carried the address scheme.
    data[0..4].copy_from_slice(&VERSION_XPUB);
    let xpub = Xpub::decode(&data)
        .map_err(|err| NodeError::bitcoin("extended key parse", format!("error parsing extended public key: [{err}]")))?;
    Ok((xpub, scheme))
}

/// Derives the concrete Bitcoin address at `index` under an extended public
/// key, extrapolating keys above the chain level with `/0` children.
///
/// Supported formats: `xpub` (BIP-44), `ypub` (BIP-49 and BIP-141
/// P2WPKH-in-P2SH) and `zpub` (BIP-84); hardened indices are rejected
/// because only public-key derivation is available.
pub fn derive_address(extended_address: &str, index: u32) -> Result<String> {
    let (mut xpub, scheme) = parse_extended_public_key(extended_address)?;

    if xpub.depth > MAX_EXTENDED_KEY_DEPTH {
        return Err(NodeError::bitcoin(
            "derive address",
            format!("extended public key is deeper than {MAX_EXTENDED_KEY_DEPTH}, depth: {}", xpub.depth),
        ));
    }
    if index >= HARDENED_INDEX_START {
        return Err(NodeError::bitcoin("derive address", "cannot derive a hardened key from a public key"));
    }

    let secp = Secp256k1::verification_only();
    while xpub.depth < MAX_EXTENDED_KEY_DEPTH {
        xpub = xpub
            .ckd_pub(&secp, ChildNumber::Normal { index: 0 })
            .map_err(|err| NodeError::bitcoin("derive address", err))?;
    }
    let child_number =
        ChildNumber::from_normal_idx(index).map_err(|err| NodeError::bitcoin("derive address", err))?;
    let child = xpub.ckd_pub(&secp, child_number).map_err(|err| NodeError::bitcoin("derive address", err))?;

    let compressed = CompressedPublicKey(child.public_key);
    let address = match scheme {
        AddressScheme::P2pkh => Address::p2pkh(PublicKey::new(child.public_key).pubkey_hash(), Network::Bitcoin),
        AddressScheme::P2shWpkh => Address::p2shwpkh(&compressed, Network::Bitcoin),
        AddressScheme::P2wpkh => Address::p2wpkh(&compressed, Network::Bitcoin),
    };
    Ok(address.to_string())
}

/// Accepts either a concrete Bitcoin address valid on `network` or an
/// extended public key whose derived receive address is.
pub fn validate_address(address: &str, network: Network) -> Result<()> {
    let decode_failure = match address.parse::<Address<NetworkUnchecked>>() {
        Ok(parsed) => match parsed.require_network(network) {
            Ok(_) => return Ok(()),
            Err(err) => err.to_string(),
        },
        Err(err) => err.to_string(),
    };

    let derive_failure = match derive_address(address, 0) {
        Ok(derived) => match derived.parse::<Address<NetworkUnchecked>>() {
            Ok(parsed) => match parsed.require_network(network) {
                Ok(_) => return Ok(()),
                Err(_) => {
                    return Err(NodeError::bitcoin(
                        "address validation",
                        format!("provided address [{address}] is not a valid btc address for chain [{network}]"),
                    ))
                }
            },
            Err(err) => err.to_string(),
        },
        Err(err) => err.to_string(),
    };

    Err(NodeError::bitcoin(
        "address validation",
        format!(
            "[{address}] is not a valid btc address using chain [{network}]: \
             decode address failed with [{decode_failure}] and derive address failed with [{derive_failure}]"
        ),
    ))
}

/// BIP-143 script code for a P2WPKH spend of the keep's group key.
pub fn p2wpkh_script_code(group_public_key: &GroupPublicKey) -> Result<ScriptBuf> {
    let public_key = PublicKey::new(group_public_key.to_secp()?);
    Ok(ScriptBuf::new_p2pkh(&public_key.pubkey_hash()))
}

const TX_OVERHEAD_VBYTES: u64 = 11;
const P2WPKH_INPUT_VBYTES: u64 = 68;
const OUTPUT_BASE_VBYTES: u64 = 9;

fn estimate_vsize(output_scripts: &[ScriptBuf]) -> u64 {
    let outputs: u64 = output_scripts.iter().map(|spk| OUTPUT_BASE_VBYTES + spk.len() as u64).sum();
    TX_OVERHEAD_VBYTES + P2WPKH_INPUT_VBYTES + outputs
}

/// Builds the unsigned sweep: one P2WPKH input spending the funding UTXO,
/// one output per beneficiary, each paid an equal share of the value after
/// the fee. Output order is the caller's address order, so callers sort
/// first when byte-identical transactions across members are required.
pub fn construct_unsigned_transaction(
    prev_txid_hex: &str,
    prev_output_index: u32,
    prev_output_value: u64,
    fee_per_vbyte: i64,
    output_addresses: &[String],
    network: Network,
) -> Result<Transaction> {
    if output_addresses.is_empty() {
        return Err(NodeError::bitcoin("transaction construction", "no output addresses"));
    }
    if fee_per_vbyte <= 0 {
        return Err(NodeError::bitcoin("transaction construction", format!("invalid fee per vbyte [{fee_per_vbyte}]")));
    }

    let txid: Txid = prev_txid_hex
        .parse()
        .map_err(|err| NodeError::bitcoin("transaction construction", format!("invalid previous txid: {err}")))?;

    let mut output_scripts = Vec::with_capacity(output_addresses.len());
    for address in output_addresses {
        let parsed = address
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|err| NodeError::bitcoin("transaction construction", format!("invalid output address [{address}]: {err}")))?
            .require_network(network)
            .map_err(|err| NodeError::bitcoin("transaction construction", format!("invalid output address [{address}]: {err}")))?;
        output_scripts.push(parsed.script_pubkey());
    }

    let fee = estimate_vsize(&output_scripts) * fee_per_vbyte as u64;
    if fee >= prev_output_value {
        return Err(NodeError::bitcoin(
            "transaction construction",
            format!("fee [{fee}] consumes the entire input value [{prev_output_value}]"),
        ));
    }
    let share = (prev_output_value - fee) / output_addresses.len() as u64;

    let input = TxIn {
        previous_output: OutPoint::new(txid, prev_output_index),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    };
    let outputs = output_scripts
        .into_iter()
        .map(|script_pubkey| TxOut { value: Amount::from_sat(share), script_pubkey })
        .collect();

    Ok(Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: vec![input],
        output: outputs,
    })
}

/// BIP-143 all-inputs sighash for the sweep's single input.
pub fn witness_sighash(tx: &Transaction, script_code: &Script, prev_output_value: u64) -> Result<Digest> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wsh_signature_hash(0, script_code, Amount::from_sat(prev_output_value), EcdsaSighashType::All)
        .map_err(|err| NodeError::bitcoin("sighash", err))?;
    Ok(Digest::new(sighash.to_byte_array()))
}

/// Attaches the threshold signature as a P2WPKH witness and returns the
/// consensus-encoded transaction hex ready for out-of-band broadcast.
pub fn build_signed_transaction_hex(
    tx: &Transaction,
    signature: &EcdsaSignature,
    group_public_key: &GroupPublicKey,
) -> Result<String> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);
    let der = secp256k1::ecdsa::Signature::from_compact(&compact)
        .map_err(|err| NodeError::bitcoin("witness assembly", format!("invalid signature: {err}")))?;

    let mut der_with_flag = der.serialize_der().to_vec();
    der_with_flag.push(EcdsaSighashType::All.to_u32() as u8);

    let mut witness = Witness::new();
    witness.push(&der_with_flag);
    witness.push(group_public_key.to_secp()?.serialize());

    let mut signed = tx.clone();
    signed.input[0].witness = witness;
    Ok(serialize_hex(&signed))
}
