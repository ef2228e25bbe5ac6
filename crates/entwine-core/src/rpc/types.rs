//! Raw record types mirroring the node's JSON-RPC responses.
//!
//! These are the wire shapes of `getblock` (verbosity 1) and
//! `getrawtransaction` (verbose), kept separate from the domain model in
//! `crate::types`. Conversion into the domain model — including strict
//! shape validation and amount parsing — lives with the domain types.

use bitcoin::{BlockHash, Txid};
use serde::Deserialize;

// ==============================================================================
// Blocks
// ==============================================================================

/// Raw block record from `getblock`: ordered txids plus header fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub hash: BlockHash,
    pub height: u64,
    /// Header timestamp, UTC seconds.
    pub time: u64,
    pub tx: Vec<Txid>,
    /// Absent on the chain tip.
    #[serde(rename = "nextblockhash")]
    pub next_block_hash: Option<BlockHash>,
}

// ==============================================================================
// Transactions
// ==============================================================================

/// Raw transaction record from `getrawtransaction` with `verbose=1`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTx {
    pub txid: Txid,
    pub vin: Vec<RawVin>,
    pub vout: Vec<RawVout>,
}

/// A raw input: either a coinbase marker or a previous-output reference.
/// Shape validation happens during conversion, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVin {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<Txid>,
    #[serde(default)]
    pub vout: Option<u32>,
}

/// A raw output. `value` stays a JSON number here so the BTC-denominated
/// decimal reaches the amount parser as exact text.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVout {
    pub n: u32,
    pub value: serde_json::Number,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RawScriptPubKey,
}

/// The node's script decoding: an opaque type label and the payee
/// addresses it extracted, if any. Older nodes emit `addresses` (plural);
/// modern ones emit a single `address`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawScriptPubKey {
    #[serde(rename = "type")]
    pub script_type: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RawScriptPubKey {
    /// The payee addresses in node order, whichever field carried them.
    pub fn address_list(&self) -> Vec<String> {
        if let Some(addresses) = &self.addresses {
            addresses.clone()
        } else if let Some(address) = &self.address {
            vec![address.clone()]
        } else {
            Vec::new()
        }
    }
}
