//! Sort/unique post-processing for dump files.
//!
//! Sorting is delegated to the platform `sort` binary (with `LC_ALL=C` for
//! byte order) so files far larger than memory stay out of core. The dedup
//! pass is idempotent: rerunning it over an already-processed directory is
//! a no-op.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::CoreError;

use super::{data_path, DumpFormat, DEDUP_TABLES};

/// Restore the dump invariants after streaming: produce an ordered,
/// deduplicated `addresses` file and, when `dedup_transactions` is set,
/// deduplicate the tables that receive re-observed ancestor rows. The sort
/// key is lexicographic on the full row.
pub fn dedup_pass(
    dir: &Path,
    format: &DumpFormat,
    dedup_transactions: bool,
) -> Result<(), CoreError> {
    let inline_header = !format.separate_header;

    sort_file(
        &data_path(dir, "addresses"),
        format.delimiter,
        None,
        true,
        inline_header,
    )?;

    if dedup_transactions {
        for name in DEDUP_TABLES {
            sort_file(&data_path(dir, name), format.delimiter, None, true, inline_header)?;
        }
    }
    Ok(())
}

/// Sort a file in place with the platform `sort`.
///
/// `key` is a `sort -k` field spec (fields split on `delimiter`); `None`
/// compares whole rows. `unique` adds `-u`. With `skip_header` the first
/// line is held aside and rejoined after sorting.
pub(crate) fn sort_file(
    path: &Path,
    delimiter: u8,
    key: Option<&str>,
    unique: bool,
    skip_header: bool,
) -> Result<(), CoreError> {
    debug!(file = %path.display(), ?key, unique, skip_header, "sorting dump file");
    if !skip_header {
        return run_sort(path, delimiter, key, unique);
    }

    // Split the header off into a sibling temp file, sort the body, rejoin.
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = String::new();
    reader.read_line(&mut header)?;

    let body_path = path.with_extension("csv.sorting");
    {
        let mut body = File::create(&body_path)?;
        io::copy(&mut reader, &mut body)?;
    }
    run_sort(&body_path, delimiter, key, unique)?;

    let mut rejoined = File::create(path)?;
    rejoined.write_all(header.as_bytes())?;
    io::copy(&mut File::open(&body_path)?, &mut rejoined)?;
    std::fs::remove_file(&body_path)?;
    Ok(())
}

fn run_sort(path: &Path, delimiter: u8, key: Option<&str>, unique: bool) -> Result<(), CoreError> {
    let mut command = Command::new("sort");
    command.env("LC_ALL", "C");
    if let Some(key) = key {
        command.arg("-t").arg((delimiter as char).to_string());
        command.arg("-k").arg(key);
    }
    if unique {
        command.arg("-u");
    }
    command.arg("-o").arg(path).arg(path);

    let status = command.status()?;
    if !status.success() {
        return Err(CoreError::Sort {
            file: path.to_path_buf(),
            code: status.code(),
        });
    }
    Ok(())
}
