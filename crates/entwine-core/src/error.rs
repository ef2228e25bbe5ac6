//! Error types for entwine-core.

use std::path::PathBuf;

// ==============================================================================
// RPC Errors
// ==============================================================================

/// Structured errors from the Bitcoin Core JSON-RPC layer.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, which makes programmatic error
/// handling (e.g. retries on transport errors vs. logic errors) possible.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    /// Transport-level retries were exhausted. Carries the last failure.
    #[error("RPC unreachable after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: reqwest::Error,
    },

    #[error("JSON-RPC error: code={code}, message={message}")]
    ServerError { code: i64, message: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("batch response missing item id={id}")]
    MissingBatchItem { id: u64 },
}

// ==============================================================================
// Core Errors
// ==============================================================================

/// Top-level error type for the entwine-core crate.
///
/// Fatal pipeline errors propagate unchanged to the caller; the binary may
/// wrap them once for context but the kind and message are preserved.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("configuration: {0}")]
    Config(String),

    /// The chain returned by the node contradicts the walk contract
    /// (height skip, missing `nextblockhash` mid-range).
    #[error("chain inconsistency: {0}")]
    ChainInconsistency(String),

    /// A record from the node violates the documented RPC schema.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The platform sort subprocess failed on a dump file.
    #[error("sort failed on {}: exit code {code:?}", file.display())]
    Sort { file: PathBuf, code: Option<i32> },

    /// The dump handed to the entity resolver violates its input contract
    /// (duplicate address, non-monotone sort, unknown address).
    #[error("entity resolution: {0}")]
    EntityResolve(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
