//! Dump writer — the eight append-only CSV streams of a ledger dump.
//!
//! File schemas follow the bulk-loader layout: nodes (`blocks`,
//! `transactions`, `outputs`, `addresses`) and relationships
//! (`rel_block_tx`, `rel_tx_output`, `rel_input`, `rel_output_address`).
//! Headers can be written typed (`hash:ID(Block)`) or plain, inline or as a
//! sibling `*_header` file. Post-processing restores the dump invariants
//! with a sort/unique pass.

pub(crate) mod post;

pub use post::dedup_pass;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};

use crate::error::CoreError;
use crate::resolve::ResolvedAncestor;
use crate::types::{format_btc, Block, OutputKey, Transaction, TxInput, COINBASE_KEY};

// ==============================================================================
// Schemas
// ==============================================================================

struct Table {
    name: &'static str,
    /// Typed column names; the plain variant strips everything from the
    /// first `:` on.
    columns: &'static [&'static str],
}

const TABLES: [Table; 8] = [
    Table {
        name: "blocks",
        columns: &["hash:ID(Block)", "height:int", "timestamp:int"],
    },
    Table {
        name: "transactions",
        columns: &["txid:ID(Transaction)", "coinbase:boolean"],
    },
    Table {
        name: "outputs",
        columns: &["txid_n:ID(Output)", "n:int", "value:double", "type"],
    },
    Table {
        name: "addresses",
        columns: &["address:ID(Address)"],
    },
    Table {
        name: "rel_block_tx",
        columns: &["hash:START_ID(Block)", "txid:END_ID(Transaction)"],
    },
    Table {
        name: "rel_tx_output",
        columns: &["txid:START_ID(Transaction)", "txid_n:END_ID(Output)"],
    },
    Table {
        name: "rel_input",
        columns: &["txid:END_ID(Transaction)", "txid_n:START_ID(Output)"],
    },
    Table {
        name: "rel_output_address",
        columns: &["txid_n:START_ID(Output)", "address:END_ID(Address)"],
    },
];

/// Names of the files that receive re-observed ancestor rows and are
/// therefore covered by the optional transaction dedup pass.
const DEDUP_TABLES: [&str; 4] = ["transactions", "rel_tx_output", "outputs", "rel_output_address"];

// ==============================================================================
// Format
// ==============================================================================

/// Presentation options shared by all files of one dump.
#[derive(Debug, Clone)]
pub struct DumpFormat {
    /// Single-byte field delimiter.
    pub delimiter: u8,
    /// Strip the `:TYPE(Label)` suffixes from column names.
    pub plain_header: bool,
    /// Write headers to sibling `*_header.csv` files instead of inline,
    /// so data files stay concatenable and sortable.
    pub separate_header: bool,
}

impl Default for DumpFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            plain_header: false,
            separate_header: true,
        }
    }
}

// ==============================================================================
// Dump Writer
// ==============================================================================

/// Streams normalized blocks into the eight dump files, append-only.
///
/// One writer per file, single-threaded; reordering and dedup happen in the
/// explicit [`finalize`](Self::finalize) post-step, never during streaming.
pub struct DumpWriter {
    dir: PathBuf,
    format: DumpFormat,
    blocks: csv::Writer<File>,
    transactions: csv::Writer<File>,
    outputs: csv::Writer<File>,
    addresses: csv::Writer<File>,
    rel_block_tx: csv::Writer<File>,
    rel_tx_output: csv::Writer<File>,
    rel_input: csv::Writer<File>,
    rel_output_address: csv::Writer<File>,
}

impl DumpWriter {
    /// Create the dump directory, write headers, and open all eight data
    /// files for appending. Rerunning over an existing directory appends;
    /// the dedup pass makes reruns of the same range idempotent.
    pub fn create(dir: &Path, format: DumpFormat) -> Result<Self, CoreError> {
        std::fs::create_dir_all(dir)?;

        for table in &TABLES {
            write_header(dir, &format, table)?;
        }

        Ok(Self {
            blocks: open_append(dir, &format, "blocks")?,
            transactions: open_append(dir, &format, "transactions")?,
            outputs: open_append(dir, &format, "outputs")?,
            addresses: open_append(dir, &format, "addresses")?,
            rel_block_tx: open_append(dir, &format, "rel_block_tx")?,
            rel_tx_output: open_append(dir, &format, "rel_tx_output")?,
            rel_input: open_append(dir, &format, "rel_input")?,
            rel_output_address: open_append(dir, &format, "rel_output_address")?,
            dir: dir.to_path_buf(),
            format,
        })
    }

    /// Append one block and everything it contains.
    pub fn write_block(&mut self, block: &Block) -> Result<(), CoreError> {
        let block_hash = block.hash.to_string();
        let height = block.height.to_string();
        let time = block.time.to_string();
        self.blocks
            .write_record([block_hash.as_str(), height.as_str(), time.as_str()])?;

        for tx in &block.transactions {
            let txid = tx.txid.to_string();
            self.rel_block_tx
                .write_record([block_hash.as_str(), txid.as_str()])?;
            self.write_transaction(tx)?;
        }
        Ok(())
    }

    fn write_transaction(&mut self, tx: &Transaction) -> Result<(), CoreError> {
        let txid = tx.txid.to_string();
        self.transactions
            .write_record([txid.as_str(), bool_str(tx.is_coinbase())])?;

        for input in &tx.inputs {
            let referenced = match input {
                TxInput::Coinbase => COINBASE_KEY.to_owned(),
                TxInput::Spend { prev, .. } => OutputKey::from(*prev).to_string(),
            };
            self.rel_input
                .write_record([txid.as_str(), referenced.as_str()])?;
        }

        for output in &tx.outputs {
            let key = output.key(tx.txid).to_string();
            let n = output.n.to_string();
            let value = format_btc(output.value);
            self.outputs.write_record([
                key.as_str(),
                n.as_str(),
                value.as_str(),
                output.script_type.as_str(),
            ])?;
            self.rel_tx_output
                .write_record([txid.as_str(), key.as_str()])?;
            for address in &output.addresses {
                self.addresses.write_record([address.as_str()])?;
                self.rel_output_address
                    .write_record([key.as_str(), address.as_str()])?;
            }
        }
        Ok(())
    }

    /// Re-emit an out-of-range ancestor so every referenced output key has
    /// its `transactions`/`outputs`/`rel_tx_output`/`rel_output_address`
    /// rows in this dump. Duplicate re-observations are removed by the
    /// dedup pass.
    pub fn write_ancestor(&mut self, ancestor: &ResolvedAncestor) -> Result<(), CoreError> {
        let txid = ancestor.txid.to_string();
        self.transactions
            .write_record([txid.as_str(), bool_str(ancestor.is_coinbase)])?;

        for output in &ancestor.outputs {
            let key = output.key(ancestor.txid).to_string();
            let n = output.n.to_string();
            let value = format_btc(output.value);
            self.outputs.write_record([
                key.as_str(),
                n.as_str(),
                value.as_str(),
                output.script_type.as_str(),
            ])?;
            self.rel_tx_output
                .write_record([txid.as_str(), key.as_str()])?;
            for address in &output.addresses {
                self.addresses.write_record([address.as_str()])?;
                self.rel_output_address
                    .write_record([key.as_str(), address.as_str()])?;
            }
        }
        Ok(())
    }

    /// Flush everything and run the sort/unique post-step: `addresses` is
    /// always deduplicated; the re-observation tables only when
    /// `dedup_transactions` is set.
    pub fn finalize(mut self, dedup_transactions: bool) -> Result<(), CoreError> {
        for writer in [
            &mut self.blocks,
            &mut self.transactions,
            &mut self.outputs,
            &mut self.addresses,
            &mut self.rel_block_tx,
            &mut self.rel_tx_output,
            &mut self.rel_input,
            &mut self.rel_output_address,
        ] {
            writer.flush()?;
        }

        // Close the data files before the sort subprocess rewrites them.
        let DumpWriter { dir, format, .. } = self;
        dedup_pass(&dir, &format, dedup_transactions)
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.csv"))
}

fn open_append(dir: &Path, format: &DumpFormat, name: &str) -> Result<csv::Writer<File>, CoreError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_path(dir, name))?;
    Ok(WriterBuilder::new()
        .delimiter(format.delimiter)
        .quote_style(QuoteStyle::Necessary)
        .has_headers(false)
        .from_writer(file))
}

/// Write a table's header. Separate-header mode rewrites the sibling header
/// file; inline mode writes the header only when the data file is new, so
/// appending reruns do not duplicate it.
fn write_header(dir: &Path, format: &DumpFormat, table: &Table) -> Result<(), CoreError> {
    let columns: Vec<&str> = table
        .columns
        .iter()
        .map(|column| {
            if format.plain_header {
                column.split(':').next().unwrap_or(column)
            } else {
                column
            }
        })
        .collect();

    let path = if format.separate_header {
        dir.join(format!("{}_header.csv", table.name))
    } else {
        let data = data_path(dir, table.name);
        let already_written = std::fs::metadata(&data).map(|m| m.len() > 0).unwrap_or(false);
        if already_written {
            return Ok(());
        }
        data
    };

    let mut writer = WriterBuilder::new()
        .delimiter(format.delimiter)
        .quote_style(QuoteStyle::Necessary)
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(&columns)?;
    writer.flush()?;
    Ok(())
}

// ==============================================================================
// Tests
// ==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use crate::types::Block;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn sample_block() -> Block {
        let coinbase = make_raw_tx(
            txid_from_byte(1),
            vec![coinbase_vin()],
            vec![simple_vout(0, 50.0, &["A"])],
        );
        let spend = make_raw_tx(
            txid_from_byte(2),
            vec![spend_vin(txid_from_byte(1), 0)],
            vec![
                simple_vout(0, 30.0, &["B"]),
                simple_vout(1, 20.0, &["A", "C"]),
            ],
        );
        let raw = make_raw_block(7, 100, &[txid_from_byte(1), txid_from_byte(2)], None);
        Block::from_raw(&raw, vec![coinbase, spend]).expect("valid block")
    }

    #[test]
    fn writes_all_eight_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DumpWriter::create(dir.path(), DumpFormat::default()).unwrap();
        writer.write_block(&sample_block()).unwrap();
        writer.finalize(true).unwrap();

        let tx1 = txid_from_byte(1).to_string();
        let tx2 = txid_from_byte(2).to_string();

        let blocks = read_lines(&dir.path().join("blocks.csv"));
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains(",100,"));

        let transactions = read_lines(&dir.path().join("transactions.csv"));
        assert!(transactions.contains(&format!("{tx1},true")));
        assert!(transactions.contains(&format!("{tx2},false")));

        let rel_input = read_lines(&dir.path().join("rel_input.csv"));
        assert!(rel_input.contains(&format!("{tx1},COINBASE")));
        assert!(rel_input.contains(&format!("{tx2},{tx1}_0")));

        let outputs = read_lines(&dir.path().join("outputs.csv"));
        assert!(outputs.contains(&format!("{tx2}_0,0,30.00000000,pubkeyhash")));

        let addresses = read_lines(&dir.path().join("addresses.csv"));
        assert_eq!(addresses, ["A", "B", "C"], "sorted and unique");

        let rel_output_address = read_lines(&dir.path().join("rel_output_address.csv"));
        assert!(rel_output_address.contains(&format!("{tx2}_1,A")));
        assert!(rel_output_address.contains(&format!("{tx2}_1,C")));

        let rel_block_tx = read_lines(&dir.path().join("rel_block_tx.csv"));
        assert_eq!(rel_block_tx.len(), 2);

        let rel_tx_output = read_lines(&dir.path().join("rel_tx_output.csv"));
        assert_eq!(rel_tx_output.len(), 3);
    }

    #[test]
    fn typed_headers_in_sibling_files_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DumpWriter::create(dir.path(), DumpFormat::default()).unwrap();
        writer.finalize(false).unwrap();

        let header = read_lines(&dir.path().join("blocks_header.csv"));
        assert_eq!(header, ["hash:ID(Block),height:int,timestamp:int"]);
        assert!(read_lines(&dir.path().join("blocks.csv")).is_empty());
    }

    #[test]
    fn plain_headers_strip_type_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let format = DumpFormat {
            plain_header: true,
            ..Default::default()
        };
        let writer = DumpWriter::create(dir.path(), format).unwrap();
        writer.finalize(false).unwrap();

        let header = read_lines(&dir.path().join("transactions_header.csv"));
        assert_eq!(header, ["txid,coinbase"]);
    }

    #[test]
    fn inline_headers_stay_first_after_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let format = DumpFormat {
            separate_header: false,
            ..Default::default()
        };
        let mut writer = DumpWriter::create(dir.path(), format).unwrap();
        writer.write_block(&sample_block()).unwrap();
        writer.finalize(true).unwrap();

        let addresses = read_lines(&dir.path().join("addresses.csv"));
        assert_eq!(addresses, ["address:ID(Address)", "A", "B", "C"]);
        assert!(!dir.path().join("addresses_header.csv").exists());
    }

    #[test]
    fn ancestor_rows_are_deduplicated() {
        use crate::resolve::ResolvedAncestor;
        use crate::types::Transaction;

        let ancestor_tx = Transaction::from_raw(make_raw_tx(
            txid_from_byte(9),
            vec![coinbase_vin()],
            vec![simple_vout(0, 25.0, &["Z"])],
        ))
        .unwrap();
        let ancestor = ResolvedAncestor {
            txid: ancestor_tx.txid,
            is_coinbase: true,
            outputs: ancestor_tx.outputs.clone(),
        };

        let dir = tempfile::tempdir().unwrap();
        let mut writer = DumpWriter::create(dir.path(), DumpFormat::default()).unwrap();
        writer.write_ancestor(&ancestor).unwrap();
        writer.write_ancestor(&ancestor).unwrap();
        writer.finalize(true).unwrap();

        let transactions = read_lines(&dir.path().join("transactions.csv"));
        assert_eq!(transactions.len(), 1, "re-observations collapse");
        let outputs = read_lines(&dir.path().join("outputs.csv"));
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn dedup_pass_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let format = DumpFormat::default();
        let mut writer = DumpWriter::create(dir.path(), format.clone()).unwrap();
        writer.write_block(&sample_block()).unwrap();
        writer.finalize(true).unwrap();

        let snapshot: Vec<(String, String)> = TABLES
            .iter()
            .map(|t| {
                let path = dir.path().join(format!("{}.csv", t.name));
                (t.name.to_owned(), std::fs::read_to_string(path).unwrap())
            })
            .collect();

        dedup_pass(dir.path(), &format, true).unwrap();

        for (name, before) in snapshot {
            let after =
                std::fs::read_to_string(dir.path().join(format!("{name}.csv"))).unwrap();
            assert_eq!(before, after, "second pass must be a no-op for {name}");
        }
    }
}
