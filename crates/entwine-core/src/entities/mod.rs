//! Entity resolution — the common-input-ownership heuristic over a dump.
//!
//! Every set of addresses appearing jointly as inputs of one non-coinbase
//! transaction is assumed to belong to the same actor; entities are the
//! connected components of that relation. The computation always runs from
//! a written dump directory, never from ingestion state:
//!
//! 1. merge-join `rel_input` with `rel_output_address` into
//!    `input_addresses` (per-input payee addresses),
//! 2. stream `input_addresses` grouped by txid through a union-find keyed
//!    by dense address ids,
//! 3. emit `entities.csv` and `rel_address_entity.csv` with dense entity
//!    ids assigned in order of first appearance.

mod dsu;
mod join;

pub use dsu::DisjointSet;

use std::fs::File;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info};

use crate::dump::post::sort_file;
use crate::error::CoreError;
use crate::types::COINBASE_KEY;

/// Options for [`compute_entities`].
#[derive(Debug, Clone)]
pub struct EntityOptions {
    /// Field delimiter of the dump files.
    pub delimiter: u8,
    /// Sort `rel_input` (by referenced output) and `rel_output_address`
    /// (by output key) before joining, instead of requiring pre-sorted
    /// inputs.
    pub sort_input: bool,
    /// Also emit addresses never observed as an input payee, each as a
    /// singleton entity. Off by default: pure receive-only addresses carry
    /// no co-spend evidence.
    pub cluster_output_addresses: bool,
    /// Whether the dump carries headers in sibling `*_header` files
    /// (default) or inline as the first line of each data file.
    pub separate_headers: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            sort_input: false,
            cluster_output_addresses: false,
            separate_headers: true,
        }
    }
}

/// Counters reported after a resolution run.
#[derive(Debug, Clone)]
pub struct EntitySummary {
    pub addresses: usize,
    pub input_rows: u64,
    pub entities: u64,
}

/// Resolve entities over the dump in `dir`.
///
/// Requires the dump's `addresses` file to be sorted and unique (the export
/// dedup pass guarantees this); a duplicate or out-of-order address is a
/// fatal inconsistency. Deterministic for a given dump: identical inputs
/// produce byte-identical outputs.
pub fn compute_entities(dir: &Path, opts: &EntityOptions) -> Result<EntitySummary, CoreError> {
    let skip_headers = !opts.separate_headers;

    if opts.sort_input {
        info!("sorting join inputs");
        sort_file(
            &dir.join("rel_input.csv"),
            opts.delimiter,
            Some("2,2"),
            false,
            skip_headers,
        )?;
        sort_file(
            &dir.join("rel_output_address.csv"),
            opts.delimiter,
            None,
            false,
            skip_headers,
        )?;
    }

    info!("deriving per-input addresses");
    let input_rows = join::calculate_input_addresses(dir, opts.delimiter, skip_headers)?;
    sort_file(
        &dir.join("input_addresses.csv"),
        opts.delimiter,
        None,
        false,
        false,
    )?;
    info!(rows = input_rows, "input addresses derived");

    info!("reading address table");
    let addresses = load_address_table(dir, opts.delimiter, skip_headers)?;
    info!(count = addresses.len(), "address table loaded");

    let (mut dsu, seen) = union_over_transactions(dir, opts.delimiter, &addresses)?;

    info!("assigning entity ids");
    let entities = emit_entities(dir, opts, &addresses, &mut dsu, &seen)?;
    info!(entities, "entity resolution complete");

    Ok(EntitySummary {
        addresses: addresses.len(),
        input_rows,
        entities,
    })
}

/// Load the sorted unique address table; position is the dense id.
fn load_address_table(
    dir: &Path,
    delimiter: u8,
    skip_header: bool,
) -> Result<Vec<String>, CoreError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(skip_header)
        .from_path(dir.join("addresses.csv"))?;

    let mut addresses: Vec<String> = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let Some(address) = record.get(0) else {
            continue;
        };
        if let Some(last) = addresses.last() {
            if address == last {
                return Err(CoreError::EntityResolve(format!(
                    "duplicate address `{address}` in address table"
                )));
            }
            if address < last.as_str() {
                return Err(CoreError::EntityResolve(format!(
                    "address table is not sorted (`{address}` after `{last}`)"
                )));
            }
        }
        addresses.push(address.to_owned());
    }

    if addresses.len() > u32::MAX as usize {
        return Err(CoreError::EntityResolve(format!(
            "address table of {} entries exceeds dense u32 ids",
            addresses.len()
        )));
    }
    Ok(addresses)
}

/// Stream `input_addresses` grouped by txid and union each group of two or
/// more distinct addresses. Returns the forest and the set of address ids
/// observed as input payees.
fn union_over_transactions(
    dir: &Path,
    delimiter: u8,
    addresses: &[String],
) -> Result<(DisjointSet, Vec<bool>), CoreError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(dir.join("input_addresses.csv"))?;

    let mut dsu = DisjointSet::new(addresses.len());
    let mut seen = vec![false; addresses.len()];

    let mut current_txid = String::new();
    let mut group: Vec<u32> = Vec::new();
    let mut record = StringRecord::new();
    let mut processed: u64 = 0;

    loop {
        let more = reader.read_record(&mut record)?;
        let boundary = !more
            || record
                .get(0)
                .is_some_and(|txid| txid != current_txid);

        if boundary && !group.is_empty() {
            group.sort_unstable();
            group.dedup();
            for pair in group.windows(2) {
                dsu.union(pair[0], pair[1]);
            }
            group.clear();
        }
        if !more {
            break;
        }

        let (Some(txid), Some(address)) = (record.get(0), record.get(1)) else {
            return Err(CoreError::EntityResolve(format!(
                "input_addresses row {record:?} does not have two columns"
            )));
        };
        if txid != current_txid {
            current_txid.clear();
            current_txid.push_str(txid);
        }
        if address.is_empty() || address == COINBASE_KEY {
            continue;
        }

        let id = addresses
            .binary_search_by(|candidate| candidate.as_str().cmp(address))
            .map_err(|_| {
                CoreError::EntityResolve(format!(
                    "input address `{address}` is missing from the address table"
                ))
            })?;
        let id = id as u32;
        seen[id as usize] = true;
        group.push(id);

        processed += 1;
        if processed % 100_000 == 0 {
            debug!(processed, "input address rows processed");
        }
    }

    Ok((dsu, seen))
}

/// Scan addresses in table order, assign dense entity ids by first
/// appearance of each representative, and write both output files.
fn emit_entities(
    dir: &Path,
    opts: &EntityOptions,
    addresses: &[String],
    dsu: &mut DisjointSet,
    seen: &[bool],
) -> Result<u64, CoreError> {
    let mut entity_writer = entity_csv(dir, "entities.csv", opts.delimiter)?;
    let mut rel_writer = entity_csv(dir, "rel_address_entity.csv", opts.delimiter)?;
    entity_writer.write_record(["id:ID(Entity)"])?;
    rel_writer.write_record([":START_ID(Address)", ":END_ID(Entity)"])?;

    const UNASSIGNED: u64 = 0;
    let mut entity_of_root: Vec<u64> = vec![UNASSIGNED; addresses.len()];
    let mut next_id: u64 = 0;

    for (index, address) in addresses.iter().enumerate() {
        if !seen[index] && !opts.cluster_output_addresses {
            continue;
        }
        let root = dsu.find(index as u32) as usize;
        if entity_of_root[root] == UNASSIGNED {
            next_id += 1;
            entity_of_root[root] = next_id;
            entity_writer.write_record([next_id.to_string().as_str()])?;
        }
        let entity = entity_of_root[root].to_string();
        rel_writer.write_record([address.as_str(), entity.as_str()])?;
    }

    entity_writer.flush()?;
    rel_writer.flush()?;
    Ok(next_id)
}

fn entity_csv(dir: &Path, name: &str, delimiter: u8) -> Result<csv::Writer<File>, CoreError> {
    Ok(WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .has_headers(false)
        .from_path(dir.join(name))?)
}

// ==============================================================================
// Tests
// ==============================================================================
