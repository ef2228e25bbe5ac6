use crate::error::RpcError;

#[derive(serde::Serialize)]
pub(super) struct JsonRpcRequest {
    pub(super) jsonrpc: &'static str,
    pub(super) id: u64,
    pub(super) method: &'static str,
    pub(super) params: Vec<serde_json::Value>,
}

#[derive(serde::Deserialize)]
pub(super) struct JsonRpcResponse {
    pub(super) result: Option<serde_json::Value>,
    pub(super) error: Option<serde_json::Value>,
}

#[derive(serde::Deserialize)]
pub(super) struct JsonRpcBatchItem {
    pub(super) id: serde_json::Value,
    pub(super) result: Option<serde_json::Value>,
    pub(super) error: Option<serde_json::Value>,
}

/// Parse a JSON-RPC error value into a structured `RpcError`.
///
/// The JSON-RPC spec defines errors as `{"code": <int>, "message": <string>}`.
/// If the error value matches that shape, we produce a `ServerError`;
/// otherwise we fall back to `InvalidResponse` with the raw JSON.
pub(super) fn parse_jsonrpc_error(err: serde_json::Value) -> RpcError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    if let Ok(parsed) = serde_json::from_value::<JsonRpcError>(err.clone()) {
        RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        }
    } else {
        RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}"))
    }
}

pub(super) fn parse_batch_id(id: &serde_json::Value) -> Result<u64, RpcError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| RpcError::InvalidResponse(format!("invalid batch response id string: {e}")));
    }

    Err(RpcError::InvalidResponse(format!(
        "invalid batch response id: {id}"
    )))
}

/// Whether a response body looks like a JSON-RPC envelope. Bitcoin Core
/// reports method-level errors with HTTP 500 plus a valid envelope; a 5xx
/// without one comes from a proxy or a dying node and is retryable.
pub(super) fn looks_like_jsonrpc(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .map(|v| {
            v.get("result").is_some()
                || v.get("error").is_some()
                || v.as_array()
                    .is_some_and(|items| items.iter().all(|i| i.get("id").is_some()))
        })
        .unwrap_or(false)
}
