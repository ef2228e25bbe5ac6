//! Domain types for Entwine's normalized ledger model.
//!
//! Raw node records (`rpc::types`) are converted here into owned, fully
//! decoded values: `Block`, `Transaction`, `TxInput`, `TxOutput`. Conversion
//! validates the documented RPC shape strictly; a record that violates it is
//! a fatal [`CoreError::InvalidRecord`].

use bitcoin::{Amount, BlockHash, Denomination, OutPoint, Txid};

use crate::error::CoreError;
use crate::rpc::types::{RawBlock, RawTx, RawVin, RawVout};

/// The synthetic output key written to `rel_input` for coinbase inputs.
/// Never a valid `{txid}_{n}` key and never an address.
pub const COINBASE_KEY: &str = "COINBASE";

// ==============================================================================
// Output Keys
// ==============================================================================

/// Composite identifier of a transaction output, rendered as `{txid}_{n}`
/// in every dump file that references an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputKey {
    pub txid: Txid,
    pub vout: u32,
}

impl From<OutPoint> for OutputKey {
    fn from(outpoint: OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
        }
    }
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.txid, self.vout)
    }
}

// ==============================================================================
// Blocks
// ==============================================================================

/// A fully decoded block: header fields plus its transactions in node order.
#[derive(Debug, Clone)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    /// Header timestamp, UTC seconds.
    pub time: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block from its raw record and the batch-fetched raw
    /// transactions, which must correspond one-to-one with `raw.tx`.
    ///
    /// Only the first transaction of a block may be coinbase.
    pub(crate) fn from_raw(raw: &RawBlock, raw_txs: Vec<RawTx>) -> Result<Self, CoreError> {
        if raw_txs.len() != raw.tx.len() {
            return Err(CoreError::InvalidRecord(format!(
                "block {} lists {} txids but {} transactions were returned",
                raw.hash,
                raw.tx.len(),
                raw_txs.len()
            )));
        }

        let mut transactions = Vec::with_capacity(raw_txs.len());
        for (position, (expected_txid, raw_tx)) in raw.tx.iter().zip(raw_txs).enumerate() {
            if raw_tx.txid != *expected_txid {
                return Err(CoreError::InvalidRecord(format!(
                    "block {} position {position}: expected txid {expected_txid}, got {}",
                    raw.hash, raw_tx.txid
                )));
            }
            let tx = Transaction::from_raw(raw_tx)?;
            if tx.is_coinbase() && position != 0 {
                return Err(CoreError::InvalidRecord(format!(
                    "block {}: coinbase transaction {} at position {position}",
                    raw.hash, tx.txid
                )));
            }
            transactions.push(tx);
        }

        Ok(Self {
            hash: raw.hash,
            height: raw.height,
            time: raw.time,
            transactions,
        })
    }
}

// ==============================================================================
// Transactions
// ==============================================================================

/// A normalized transaction with ordered inputs and outputs.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub txid: Txid,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub(crate) fn from_raw(raw: RawTx) -> Result<Self, CoreError> {
        let txid = raw.txid;
        if raw.vin.is_empty() {
            return Err(CoreError::InvalidRecord(format!(
                "transaction {txid} has no inputs"
            )));
        }

        let coinbase_count = raw.vin.iter().filter(|vin| vin.coinbase.is_some()).count();
        if coinbase_count > 0 && raw.vin.len() != 1 {
            return Err(CoreError::InvalidRecord(format!(
                "transaction {txid} mixes a coinbase marker with {} inputs",
                raw.vin.len()
            )));
        }

        let inputs = raw
            .vin
            .into_iter()
            .map(|vin| TxInput::from_raw(&txid, vin))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = raw
            .vout
            .into_iter()
            .map(|vout| TxOutput::from_raw(&txid, vout))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            txid,
            inputs,
            outputs,
        })
    }

    /// A coinbase transaction has exactly one input with no previous-output
    /// reference.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [TxInput::Coinbase])
    }

    /// Sum of all output values. Also serves as the synthesized input value
    /// of a coinbase transaction.
    pub fn output_sum(&self) -> Amount {
        self.outputs.iter().fold(Amount::ZERO, |acc, output| {
            acc.checked_add(output.value).unwrap_or(Amount::MAX)
        })
    }
}

/// A transaction input: either the coinbase synthetic or a reference to a
/// previously created output, optionally enriched by the resolver.
#[derive(Debug, Clone)]
pub enum TxInput {
    Coinbase,
    Spend {
        prev: OutPoint,
        /// Data of the referenced output, attached by the input resolver.
        /// `None` until resolution, and kept `None` when the node does not
        /// know the referenced transaction.
        resolved: Option<ResolvedPrevout>,
    },
}

impl TxInput {
    fn from_raw(txid: &Txid, vin: RawVin) -> Result<Self, CoreError> {
        if vin.coinbase.is_some() {
            return Ok(Self::Coinbase);
        }
        match (vin.txid, vin.vout) {
            (Some(prev_txid), Some(prev_vout)) => Ok(Self::Spend {
                prev: OutPoint::new(prev_txid, prev_vout),
                resolved: None,
            }),
            _ => Err(CoreError::InvalidRecord(format!(
                "transaction {txid}: vin is neither coinbase nor a (txid, vout) reference"
            ))),
        }
    }

    /// The referenced outpoint, or `None` for coinbase.
    pub fn prevout(&self) -> Option<OutPoint> {
        match self {
            Self::Coinbase => None,
            Self::Spend { prev, .. } => Some(*prev),
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedPrevout> {
        match self {
            Self::Coinbase => None,
            Self::Spend { resolved, .. } => resolved.as_ref(),
        }
    }
}

/// Data of a referenced output, carried on a resolved input.
#[derive(Debug, Clone)]
pub struct ResolvedPrevout {
    pub value: Amount,
    pub script_type: String,
    pub addresses: Vec<String>,
}

/// A transaction output: positional index, value, the node's opaque script
/// type label, and the payee addresses the node extracted (possibly empty).
#[derive(Debug, Clone)]
pub struct TxOutput {
    pub n: u32,
    pub value: Amount,
    pub script_type: String,
    pub addresses: Vec<String>,
}

impl TxOutput {
    fn from_raw(txid: &Txid, vout: RawVout) -> Result<Self, CoreError> {
        let value = parse_btc_amount(&vout.value)
            .map_err(|e| CoreError::InvalidRecord(format!("transaction {txid} vout: {e}")))?;
        let addresses = vout.script_pub_key.address_list();
        Ok(Self {
            n: vout.n,
            value,
            script_type: vout.script_pub_key.script_type,
            addresses,
        })
    }

    pub fn key(&self, txid: Txid) -> OutputKey {
        OutputKey {
            txid,
            vout: self.n,
        }
    }
}

// ==============================================================================
// Amount Parsing and Formatting
// ==============================================================================

/// Parse a BTC-denominated JSON number into an exact satoshi amount.
///
/// The number's own decimal text is parsed as fixed point; scientific
/// notation (which fixed-point parsing rejects) falls back to the float
/// path. With `serde_json`'s `arbitrary_precision` the text is the exact
/// bytes the node sent.
pub(crate) fn parse_btc_amount(value: &serde_json::Number) -> Result<Amount, String> {
    let text = value.to_string();
    match Amount::from_str_in(&text, Denomination::Bitcoin) {
        Ok(amount) => Ok(amount),
        Err(_) => {
            let parsed = value
                .as_f64()
                .ok_or_else(|| format!("invalid BTC amount `{text}`"))?;
            Amount::from_float_in(parsed, Denomination::Bitcoin)
                .map_err(|e| format!("invalid BTC amount `{text}`: {e}"))
        }
    }
}

/// Render an amount as fixed-point BTC with exactly 8 fractional digits,
/// the persisted form used across all dump files.
pub fn format_btc(value: Amount) -> String {
    let sats = value.to_sat();
    format!("{}.{:08}", sats / 100_000_000, sats % 100_000_000)
}

// ==============================================================================
// Tests
// ==============================================================================
