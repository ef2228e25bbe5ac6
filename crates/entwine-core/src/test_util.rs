//! Shared test helpers for `entwine-core` unit tests.
//!
//! Consolidates builder functions for raw RPC records (`make_raw_block`,
//! `make_raw_tx`, `coinbase_vin`, …) so that tests across modules share a
//! single source of truth for dummy data construction.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};

use crate::rpc::types::{RawBlock, RawScriptPubKey, RawTx, RawVin, RawVout};

// ==============================================================================
// Id Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
/// Useful for building small test chains where txids only need to be unique.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

/// Create a deterministic `BlockHash` from a single distinguishing byte.
pub fn block_hash_from_byte(b: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    BlockHash::from_byte_array(bytes)
}

/// Unwrap a JSON value known to be a number.
pub fn number(value: serde_json::Value) -> serde_json::Number {
    match value {
        serde_json::Value::Number(n) => n,
        other => panic!("expected JSON number, got {other}"),
    }
}

// ==============================================================================
// Raw Record Builders
// ==============================================================================

/// Build a `RawBlock` whose hash is derived from `hash_byte`.
pub fn make_raw_block(
    hash_byte: u8,
    height: u64,
    txids: &[Txid],
    next_block_hash: Option<BlockHash>,
) -> RawBlock {
    RawBlock {
        hash: block_hash_from_byte(hash_byte),
        height,
        time: 1_300_000_000 + height,
        tx: txids.to_vec(),
        next_block_hash,
    }
}

pub fn make_raw_tx(txid: Txid, vin: Vec<RawVin>, vout: Vec<RawVout>) -> RawTx {
    RawTx { txid, vin, vout }
}

/// A coinbase input marker.
pub fn coinbase_vin() -> RawVin {
    RawVin {
        coinbase: Some("04ffff001d0104".to_owned()),
        txid: None,
        vout: None,
    }
}

/// A spending input referencing `prev_txid:vout`.
pub fn spend_vin(prev_txid: Txid, vout: u32) -> RawVin {
    RawVin {
        coinbase: None,
        txid: Some(prev_txid),
        vout: Some(vout),
    }
}

/// A pay-to-pubkey-hash output paying `btc` to the given addresses.
pub fn simple_vout(n: u32, btc: f64, addresses: &[&str]) -> RawVout {
    RawVout {
        n,
        value: number(serde_json::json!(btc)),
        script_pub_key: RawScriptPubKey {
            script_type: "pubkeyhash".to_owned(),
            address: None,
            addresses: Some(addresses.iter().map(|a| (*a).to_owned()).collect()),
        },
    }
}

/// An output with no extractable addresses (e.g. `nulldata`).
pub fn bare_vout(n: u32, btc: f64) -> RawVout {
    RawVout {
        n,
        value: number(serde_json::json!(btc)),
        script_pub_key: RawScriptPubKey {
            script_type: "nulldata".to_owned(),
            address: None,
            addresses: None,
        },
    }
}
