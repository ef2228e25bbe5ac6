use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use futures::future::try_join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::{CoreError, RpcError};

use super::super::types::{RawBlock, RawTx};
use super::super::BitcoinRpc;
use super::connection::{parse_connection, resolve_auth};
use super::protocol::{
    looks_like_jsonrpc, parse_batch_id, parse_jsonrpc_error, JsonRpcBatchItem, JsonRpcRequest,
    JsonRpcResponse,
};

/// How many times a transiently failing request is attempted in total.
const RETRY_ATTEMPTS: u32 = 5;

/// Fixed pause between retry attempts.
const RETRY_BACKOFF: Duration = Duration::from_secs(10);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outcome of one JSON-RPC call within a batch: the node answers each id
/// independently, so callers decide whether a per-item error is fatal.
type ItemResult = Result<serde_json::Value, RpcError>;

/// Bitcoin Core JSON-RPC client over HTTP(S).
///
/// Supports both single and batched RPC calls over a single keep-alive
/// session. Transient transport failures (refused connection, timeout, 5xx
/// without a JSON-RPC body) are retried with a fixed backoff; JSON-RPC
/// error responses are surfaced immediately with the node's code and
/// message and never retried.
#[derive(Debug)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    batch_chunk_size: usize,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for an HTTP(S) URL.
    ///
    /// Authentication precedence:
    /// 1. explicit `user` + `pass`
    /// 2. cookie file (`username:password`) from `cookie_file`
    /// 3. no auth
    ///
    /// If `requests_per_second` is set, calls are rate-limited per outbound
    /// HTTP request (batched calls count as one request).
    pub fn new(
        connection: &str,
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
        requests_per_second: Option<u32>,
        batch_chunk_size: usize,
    ) -> Result<Self, CoreError> {
        if batch_chunk_size == 0 {
            return Err(CoreError::Config(
                "rpc batch chunk size must be at least 1".to_owned(),
            ));
        }
        let auth = resolve_auth(user, pass, cookie_file)?;
        let url = parse_connection(connection)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .expect("reqwest client builder uses valid static config");

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            url,
            auth,
            limiter,
            batch_chunk_size,
            next_id: AtomicU64::new(initial_request_id()),
        })
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// POST a JSON payload and return `(status, body)`, retrying transient
    /// transport failures up to [`RETRY_ATTEMPTS`] with [`RETRY_BACKOFF`]
    /// between attempts.
    async fn send_with_retry(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(StatusCode, String), CoreError> {
        let mut attempt: u32 = 1;
        loop {
            self.wait_for_rate_limit().await;

            let mut builder = self
                .client
                .post(&self.url)
                .header(header::CONTENT_TYPE, "application/json")
                .json(payload);
            if let Some((ref user, ref pass)) = self.auth {
                builder = builder.basic_auth(user, Some(pass));
            }

            let outcome = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    match response.text().await {
                        Ok(body) => {
                            if status.is_server_error() && !looks_like_jsonrpc(&body) {
                                Err(RpcError::InvalidResponse(format!(
                                    "HTTP {status} without a JSON-RPC body"
                                )))
                            } else {
                                Ok((status, body))
                            }
                        }
                        Err(err) => Err(RpcError::Transport(err)),
                    }
                }
                Err(err) => Err(RpcError::Transport(err)),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt >= RETRY_ATTEMPTS {
                        return Err(match err {
                            RpcError::Transport(last) => RpcError::RetriesExhausted {
                                attempts: attempt,
                                last,
                            }
                            .into(),
                            other => other.into(),
                        });
                    }
                    warn!(
                        attempt,
                        max_attempts = RETRY_ATTEMPTS,
                        error = %err,
                        "transient RPC failure; retrying after backoff"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn rpc_call(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        let id = self.reserve_request_ids(1);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let payload = serde_json::to_value(&req)
            .map_err(|e| RpcError::InvalidResponse(format!("encode JSON-RPC request: {e}")))?;

        let (status, body) = self.send_with_retry(&payload).await?;
        debug!(rpc.id = id, rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;

        if let Some(err) = decoded.error {
            return Err(parse_jsonrpc_error(err).into());
        }

        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }

    /// Issue one batched JSON-RPC request and recombine responses by the
    /// caller-assigned ids. A response item missing from the batch fails the
    /// whole call; per-item JSON-RPC errors are returned in their slot.
    async fn rpc_batch(
        &self,
        method: &'static str,
        param_sets: &[Vec<serde_json::Value>],
    ) -> Result<Vec<ItemResult>, CoreError> {
        let start_id = self.reserve_request_ids(param_sets.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = param_sets.len(),
            rpc.method = method,
            "rpc batch call"
        );
        let requests: Vec<JsonRpcRequest> = param_sets
            .iter()
            .enumerate()
            .map(|(offset, params)| JsonRpcRequest {
                jsonrpc: "2.0",
                id: start_id + offset as u64,
                method,
                params: params.clone(),
            })
            .collect();
        let payload = serde_json::to_value(&requests)
            .map_err(|e| RpcError::InvalidResponse(format!("encode JSON-RPC batch: {e}")))?;

        let (status, body) = self.send_with_retry(&payload).await?;
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = param_sets.len(),
            %status,
            body_len = body.len(),
            "rpc batch response"
        );
        trace!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = param_sets.len(),
            body = %body,
            "rpc batch response body"
        );

        let decoded: Vec<JsonRpcBatchItem> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, JsonRpcBatchItem> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            let id = parse_batch_id(&item.id)?;
            by_id.insert(id, item);
        }

        let mut ordered = Vec::with_capacity(param_sets.len());
        for id in start_id..(start_id + param_sets.len() as u64) {
            let item = by_id.remove(&id).ok_or(RpcError::MissingBatchItem { id })?;
            ordered.push(match item.error {
                Some(err) => Err(parse_jsonrpc_error(err)),
                None => Ok(item.result.unwrap_or(serde_json::Value::Null)),
            });
        }

        Ok(ordered)
    }

    /// Split a large batch into node-friendly chunks, issued concurrently.
    async fn rpc_batch_chunked(
        &self,
        method: &'static str,
        param_sets: &[Vec<serde_json::Value>],
    ) -> Result<Vec<ItemResult>, CoreError> {
        if param_sets.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_futures: Vec<_> = param_sets
            .chunks(self.batch_chunk_size)
            .map(|chunk| self.rpc_batch(method, chunk))
            .collect();
        let chunked = try_join_all(chunk_futures).await?;
        Ok(chunked.into_iter().flatten().collect())
    }

    fn tx_param_sets(txids: &[Txid]) -> Vec<Vec<serde_json::Value>> {
        txids
            .iter()
            .map(|txid| vec![serde_json::json!(txid.to_string()), serde_json::json!(1)])
            .collect()
    }
}

#[async_trait]
impl BitcoinRpc for HttpRpcClient {
    async fn get_block_count(&self) -> Result<u64, CoreError> {
        let raw = self.rpc_call("getblockcount", Vec::new()).await?;
        raw.as_u64().ok_or_else(|| {
            RpcError::InvalidResponse(format!("getblockcount returned non-integer: {raw}")).into()
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        let raw = self
            .rpc_call("getblockhash", vec![serde_json::json!(height)])
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| RpcError::InvalidResponse(format!("invalid getblockhash result: {e}")).into())
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<RawBlock, CoreError> {
        let raw = self
            .rpc_call("getblock", vec![serde_json::json!(hash.to_string())])
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| CoreError::InvalidRecord(format!("getblock {hash}: {e}")))
    }

    async fn get_transactions(&self, txids: &[Txid]) -> Result<Vec<RawTx>, CoreError> {
        let results = self
            .rpc_batch_chunked("getrawtransaction", &Self::tx_param_sets(txids))
            .await?;

        txids
            .iter()
            .zip(results)
            .map(|(txid, item)| {
                let raw = item.map_err(CoreError::Rpc)?;
                serde_json::from_value(raw)
                    .map_err(|e| CoreError::InvalidRecord(format!("getrawtransaction {txid}: {e}")))
            })
            .collect()
    }

    async fn find_transactions(&self, txids: &[Txid]) -> Result<Vec<Option<RawTx>>, CoreError> {
        let results = self
            .rpc_batch_chunked("getrawtransaction", &Self::tx_param_sets(txids))
            .await?;

        txids
            .iter()
            .zip(results)
            .map(|(txid, item)| match item {
                Ok(raw) => serde_json::from_value(raw)
                    .map(Some)
                    .map_err(|e| CoreError::InvalidRecord(format!("getrawtransaction {txid}: {e}"))),
                Err(RpcError::ServerError { code, message })
                    if is_tx_not_found_server_error(code, &message) =>
                {
                    Ok(None)
                }
                Err(err) => Err(err.into()),
            })
            .collect()
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

/// Bitcoin Core reports a missing transaction as code -5 with one of a few
/// message variants, depending on version and txindex configuration.
fn is_tx_not_found_server_error(code: i64, message: &str) -> bool {
    if code != -5 {
        return false;
    }

    let msg = message.to_ascii_lowercase();
    msg.contains("not found") || msg.contains("no such mempool or blockchain transaction")
}
