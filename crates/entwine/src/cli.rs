use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_delimiter(s: &str) -> Result<char, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err("delimiter must be a single ASCII character".to_string()),
    }
}

fn parse_nonzero_usize(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{e}"))?;
    if n == 0 {
        return Err("value must be at least 1".to_string());
    }
    Ok(n)
}

/// Entwine — Bitcoin ledger graph extractor: CSV dump export and
/// common-input entity clustering over Bitcoin Core RPC.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(flatten)]
    pub rpc: RpcArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Node connection flags, shared by the RPC-backed subcommands.
#[derive(Args)]
pub struct RpcArgs {
    /// Bitcoin Core RPC URL.
    #[arg(
        long,
        global = true,
        default_value = "http://127.0.0.1:8332",
        env = "ENTWINE_RPC_URL"
    )]
    pub rpc_url: String,

    /// RPC username.
    #[arg(long, global = true, env = "ENTWINE_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password.
    #[arg(long, global = true, env = "ENTWINE_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Bitcoin Core cookie file (`username:password`), used when no
    /// explicit credentials are given.
    #[arg(long, global = true)]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Maximum outbound RPC requests per second (unlimited when unset).
    #[arg(long, global = true)]
    pub rpc_rps: Option<u32>,

    /// Maximum JSON-RPC calls per batched HTTP request.
    #[arg(long, global = true, default_value = "100", value_parser = parse_nonzero_usize)]
    pub rpc_batch_size: usize,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export a block range into a bulk-loadable CSV dump directory.
    Export {
        /// First block height (inclusive).
        #[arg(long)]
        from: u64,

        /// Last block height (inclusive); clamped to the chain tip.
        #[arg(long)]
        to: u64,

        /// Output directory. Defaults to `blocks_<from>_<to>`.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write plain column names instead of typed bulk-loader headers.
        #[arg(long)]
        plain_header: bool,

        /// Write headers inline instead of sibling `*_header.csv` files.
        #[arg(long)]
        no_separate_header: bool,

        /// Skip the dedup pass over re-observed transaction rows.
        #[arg(long)]
        no_dedup_tx: bool,

        /// Field delimiter for all dump files.
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: char,
    },

    /// Export a flow list: one CSV row per transaction output with the
    /// spending side's address attached.
    ExportFlows {
        /// First block height (inclusive).
        #[arg(long)]
        from: u64,

        /// Last block height (inclusive); clamped to the chain tip.
        #[arg(long)]
        to: u64,

        /// Output CSV file.
        #[arg(long)]
        out: PathBuf,

        /// Field delimiter.
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: char,
    },

    /// Cluster the addresses of a dump into entities with the
    /// common-input-ownership heuristic.
    ComputeEntities {
        /// Dump directory produced by `export`.
        #[arg(long = "in")]
        input: PathBuf,

        /// Sort `rel_input` and `rel_output_address` before joining instead
        /// of requiring a pre-sorted dump.
        #[arg(long)]
        sort_input: bool,

        /// Also emit addresses never observed as an input payee, each as a
        /// singleton entity.
        #[arg(long)]
        cluster_output_addresses: bool,

        /// The dump was written with inline headers.
        #[arg(long)]
        no_separate_header: bool,

        /// Field delimiter of the dump files.
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: char,
    },
}
