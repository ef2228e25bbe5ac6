//! Merge-join of `rel_input` against `rel_output_address`.
//!
//! Both inputs arrive sorted by output key, so one forward pass pairs every
//! spent output with the addresses it paid. Nothing is held in memory
//! beyond the address group of the current output key.

use std::fs::File;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};

use crate::error::CoreError;
use crate::types::COINBASE_KEY;

/// One side of the join: a sorted two-column CSV stream that yields rows and
/// enforces non-decreasing key order.
struct SortedPairs {
    reader: csv::Reader<File>,
    record: StringRecord,
    file: &'static str,
    last_key: String,
}

impl SortedPairs {
    fn open(
        path: &Path,
        delimiter: u8,
        skip_header: bool,
        file: &'static str,
    ) -> Result<Self, CoreError> {
        let reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(skip_header)
            .flexible(false)
            .from_path(path)?;
        Ok(Self {
            reader,
            record: StringRecord::new(),
            file,
            last_key: String::new(),
        })
    }

    /// Next `(key_column, other_column)` pair, with `key_column` at the
    /// given index. Returns `None` at end of file.
    fn next_pair(&mut self, key_column: usize) -> Result<Option<(String, String)>, CoreError> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        let (Some(first), Some(second)) = (self.record.get(0), self.record.get(1)) else {
            return Err(CoreError::EntityResolve(format!(
                "{} row {:?} does not have two columns",
                self.file, self.record
            )));
        };
        let (key, other) = if key_column == 0 {
            (first.to_owned(), second.to_owned())
        } else {
            (second.to_owned(), first.to_owned())
        };

        // The coinbase token is outside the key order by construction.
        if key != COINBASE_KEY {
            if key < self.last_key {
                return Err(CoreError::EntityResolve(format!(
                    "{} is not sorted by output key (`{key}` after `{}`)",
                    self.file, self.last_key
                )));
            }
            self.last_key.clear();
            self.last_key.push_str(&key);
        }
        Ok(Some((key, other)))
    }
}

/// Produce `input_addresses.csv`: one `(txid, address)` row per input and
/// payee address of the output it spends. Multi-address outputs fan out to
/// one row per address; outputs with no address rows contribute nothing.
/// Returns the number of rows written. The caller sorts the result by txid.
pub(super) fn calculate_input_addresses(
    dir: &Path,
    delimiter: u8,
    skip_headers: bool,
) -> Result<u64, CoreError> {
    let mut inputs = SortedPairs::open(
        &dir.join("rel_input.csv"),
        delimiter,
        skip_headers,
        "rel_input",
    )?;
    let mut output_addresses = SortedPairs::open(
        &dir.join("rel_output_address.csv"),
        delimiter,
        skip_headers,
        "rel_output_address",
    )?;

    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .has_headers(false)
        .from_path(dir.join("input_addresses.csv"))?;

    // Address group of the current output key on the right-hand side.
    let mut group_key = String::new();
    let mut group: Vec<String> = Vec::new();
    let mut pending = output_addresses.next_pair(0)?;
    let mut rows: u64 = 0;

    // rel_input is keyed by its second column (the referenced output).
    while let Some((out_key, txid)) = inputs.next_pair(1)? {
        if out_key == COINBASE_KEY {
            continue;
        }

        if group_key != out_key {
            group.clear();
            group_key.clear();
            group_key.push_str(&out_key);

            loop {
                let Some((key, address)) = pending.take() else {
                    break;
                };
                if key < out_key {
                    pending = output_addresses.next_pair(0)?;
                } else if key == out_key {
                    group.push(address);
                    pending = output_addresses.next_pair(0)?;
                } else {
                    pending = Some((key, address));
                    break;
                }
            }
        }

        for address in &group {
            writer.write_record([txid.as_str(), address.as_str()])?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_join(rel_input: &str, rel_output_address: &str) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rel_input.csv"), rel_input).unwrap();
        std::fs::write(dir.path().join("rel_output_address.csv"), rel_output_address).unwrap();

        calculate_input_addresses(dir.path(), b',', false).unwrap();

        std::fs::read_to_string(dir.path().join("input_addresses.csv"))
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn joins_matching_output_keys() {
        let rows = run_join(
            "t2,aa_0\nt3,bb_1\n",
            "aa_0,addrA\nbb_1,addrB\n",
        );
        assert_eq!(rows, ["t2,addrA", "t3,addrB"]);
    }

    #[test]
    fn multi_address_outputs_fan_out() {
        let rows = run_join("t2,aa_0\n", "aa_0,addrA\naa_0,addrB\n");
        assert_eq!(rows, ["t2,addrA", "t2,addrB"]);
    }

    #[test]
    fn unmatched_references_contribute_nothing() {
        // bb_1 has no address rows (e.g. nulldata, or an unresolved input
        // whose ancestor was unknown to the node).
        let rows = run_join("t2,aa_0\nt3,bb_1\n", "aa_0,addrA\n");
        assert_eq!(rows, ["t2,addrA"]);
    }

    #[test]
    fn coinbase_rows_are_skipped() {
        let rows = run_join("t1,COINBASE\nt2,aa_0\n", "aa_0,addrA\n");
        assert_eq!(rows, ["t2,addrA"]);
    }

    #[test]
    fn unsorted_right_side_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rel_input.csv"), "t2,aa_0\n").unwrap();
        std::fs::write(
            dir.path().join("rel_output_address.csv"),
            "bb_1,addrB\naa_0,addrA\n",
        )
        .unwrap();

        let err = calculate_input_addresses(dir.path(), b',', false)
            .expect_err("disorder must be detected");
        assert!(matches!(err, CoreError::EntityResolve(_)));
    }

    #[test]
    fn unsorted_left_side_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rel_input.csv"), "t3,bb_1\nt2,aa_0\n").unwrap();
        std::fs::write(dir.path().join("rel_output_address.csv"), "aa_0,addrA\n").unwrap();

        let err = calculate_input_addresses(dir.path(), b',', false)
            .expect_err("disorder must be detected");
        assert!(matches!(err, CoreError::EntityResolve(_)));
    }
}
