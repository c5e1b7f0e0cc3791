//! Websocket JSON-RPC client for the vantad daemon, the notification
//! listener, and the chain-walk helpers built on the node API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use consensus_core::Hash;
use rpc_core::{
    BestBlock, BlockHeaderVerbose, BlockVerbose, ChainTip, MempoolEntry, NodeApi,
    NodeNotification, RpcError, StakeDiff, TipStatus, TxVerbose,
};

/// Bound on the combined length of the two branches walked while searching
/// for a common ancestor.
pub const MAX_ANCESTOR_CHAIN_LENGTH: usize = 8192;

/// Transient upstream failures are retried this many times with doubling
/// back-off before surfacing.
const RPC_ATTEMPTS: u32 = 3;
const RPC_BACKOFF: Duration = Duration::from_millis(500);

/// JSON-RPC error code the node uses for unknown block/tx hashes.
const RPC_ERR_NOT_FOUND: i32 = -5;

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Websocket JSON-RPC client for vantad. Each call runs over a fresh
/// connection; the node authenticates connections with the `authenticate`
/// method before serving any other request.
pub struct NodeClient {
    url: String,
    user: String,
    pass: String,
    next_id: Arc<Mutex<u64>>,
}

impl NodeClient {
    pub fn new(url: &str, user: &str, pass: &str) -> Self {
        Self {
            url: url.to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    async fn next_id(&self) -> u64 {
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;
        id
    }

    async fn call_once(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RpcError::Network(format!("websocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        if !self.user.is_empty() {
            let auth_id = self.next_id().await;
            let auth = JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: auth_id,
                method: "authenticate".to_string(),
                params: serde_json::json!([self.user, self.pass]),
            };
            let frame = serde_json::to_string(&auth)
                .map_err(|e| RpcError::Protocol(format!("request serialization failed: {e}")))?;
            write
                .send(Message::Text(frame))
                .await
                .map_err(|e| RpcError::Network(format!("send failed: {e}")))?;
            wait_for_response(&mut read, auth_id).await?;
        }

        let id = self.next_id().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };
        let frame = serde_json::to_string(&request)
            .map_err(|e| RpcError::Protocol(format!("request serialization failed: {e}")))?;
        write
            .send(Message::Text(frame))
            .await
            .map_err(|e| RpcError::Network(format!("send failed: {e}")))?;

        wait_for_response(&mut read, id).await
    }

    /// Call with retry: transient network failures back off and retry,
    /// surfacing only after repeated consecutive failures. Protocol and
    /// not-found errors are never retried.
    async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let mut backoff = RPC_BACKOFF;
        let mut last_err = RpcError::Network("no attempts made".into());
        for attempt in 1..=RPC_ATTEMPTS {
            match self.call_once(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(RpcError::Network(msg)) => {
                    warn!(method, attempt, "transient RPC failure: {msg}");
                    last_err = RpcError::Network(msg);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err)
    }

    fn decode<T: serde::de::DeserializeOwned>(result: serde_json::Value) -> Result<T, RpcError> {
        serde_json::from_value(result).map_err(|e| RpcError::Protocol(format!("deserialization error: {e}")))
    }
}

async fn wait_for_response<S>(read: &mut S, id: u64) -> Result<serde_json::Value, RpcError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response: JsonRpcResponse = serde_json::from_str(&text)
                    .map_err(|e| RpcError::Protocol(format!("response parsing failed: {e}")))?;
                if response.id != Some(id) {
                    continue; // notification or another call's response
                }
                if let Some(err) = response.error {
                    if err.code == RPC_ERR_NOT_FOUND {
                        return Err(RpcError::NotFound);
                    }
                    return Err(RpcError::Protocol(format!("RPC error {}: {}", err.code, err.message)));
                }
                return Ok(response.result);
            }
            Ok(Message::Close(_)) => break,
            Err(e) => return Err(RpcError::Network(format!("websocket error: {e}"))),
            _ => continue,
        }
    }
    Err(RpcError::Network("connection closed without response".to_string()))
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn best_block(&self) -> Result<BestBlock, RpcError> {
        let result = self.call_method("getbestblock", serde_json::json!([])).await?;
        Self::decode(result)
    }

    async fn block_hash(&self, height: u32) -> Result<Hash, RpcError> {
        let result = self.call_method("getblockhash", serde_json::json!([height])).await?;
        Self::decode(result)
    }

    async fn block_by_hash(&self, hash: Hash) -> Result<BlockVerbose, RpcError> {
        let params = serde_json::json!([hash.to_string(), true, true]);
        let result = self.call_method("getblock", params).await?;
        Self::decode(result)
    }

    async fn block_by_height(&self, height: u32) -> Result<BlockVerbose, RpcError> {
        let hash = self.block_hash(height).await?;
        self.block_by_hash(hash).await
    }

    async fn block_header(&self, hash: Hash) -> Result<BlockHeaderVerbose, RpcError> {
        let params = serde_json::json!([hash.to_string(), true]);
        let result = self.call_method("getblockheader", params).await?;
        Self::decode(result)
    }

    async fn raw_transaction(&self, hash: Hash) -> Result<TxVerbose, RpcError> {
        let params = serde_json::json!([hash.to_string(), 1]);
        let result = self.call_method("getrawtransaction", params).await?;
        Self::decode(result)
    }

    async fn chain_tips(&self) -> Result<Vec<ChainTip>, RpcError> {
        let result = self.call_method("getchaintips", serde_json::json!([])).await?;
        Self::decode(result)
    }

    async fn raw_mempool(&self) -> Result<Vec<MempoolEntry>, RpcError> {
        let result = self.call_method("getrawmempool", serde_json::json!([true])).await?;
        Self::decode(result)
    }

    async fn stake_difficulty(&self) -> Result<StakeDiff, RpcError> {
        let current = self.call_method("getstakedifficulty", serde_json::json!([])).await?;
        let estimate = self.call_method("estimatestakediff", serde_json::json!([])).await?;
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Current {
            current_stake_difficulty: i64,
            next_stake_difficulty: i64,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Estimate {
            min: i64,
            max: i64,
            expected: i64,
        }
        let c: Current = Self::decode(current)?;
        let e: Estimate = Self::decode(estimate)?;
        Ok(StakeDiff {
            current: c.current_stake_difficulty,
            next: c.next_stake_difficulty,
            estimated_min: e.min,
            estimated_max: e.max,
            estimated_expected: e.expected,
        })
    }
}

/// Spawn a dedicated connection that registers for block and reorg
/// notifications and fans them out on a broadcast channel. Reconnects with
/// back-off until shutdown. Delivery to subscribers is at-least-once.
pub fn start_notification_listener(
    client: Arc<NodeClient>,
    mut shutdown: watch::Receiver<bool>,
) -> (broadcast::Receiver<NodeNotification>, JoinHandle<()>) {
    let (tx, rx) = broadcast::channel(64);
    let handle = tokio::spawn(async move {
        let mut backoff = RPC_BACKOFF;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match notification_session(&client, &tx, &mut shutdown).await {
                Ok(()) => return, // clean shutdown
                Err(e) => {
                    error!("notification connection lost: {e}; reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return,
                    }
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
        }
    });
    (rx, handle)
}

async fn notification_session(
    client: &NodeClient,
    tx: &broadcast::Sender<NodeNotification>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), RpcError> {
    let (ws_stream, _) = connect_async(client.url.as_str())
        .await
        .map_err(|e| RpcError::Network(format!("websocket connection failed: {e}")))?;
    let (mut write, mut read) = ws_stream.split();

    for (method, params) in [
        ("authenticate", serde_json::json!([client.user, client.pass])),
        ("notifyblocks", serde_json::json!([])),
    ] {
        if method == "authenticate" && client.user.is_empty() {
            continue;
        }
        let id = client.next_id().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };
        let frame = serde_json::to_string(&request)
            .map_err(|e| RpcError::Protocol(format!("request serialization failed: {e}")))?;
        write
            .send(Message::Text(frame))
            .await
            .map_err(|e| RpcError::Network(format!("send failed: {e}")))?;
        wait_for_response(&mut read, id).await?;
    }
    info!("registered for block and reorg notifications");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            message = read.next() => {
                let message = match message {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(RpcError::Network(format!("websocket error: {e}"))),
                    None => return Err(RpcError::Network("connection closed".into())),
                };
                let Message::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<JsonRpcResponse>(&text) else { continue };
                let Some(notification) = decode_notification(&frame) else { continue };
                debug!(?notification, "node notification");
                let _ = tx.send(notification);
            }
        }
    }
}

fn decode_notification(frame: &JsonRpcResponse) -> Option<NodeNotification> {
    match frame.method.as_deref()? {
        "blockconnected" => {
            let hash: Hash = serde_json::from_value(frame.params.get(0)?.clone()).ok()?;
            let height: u32 = serde_json::from_value(frame.params.get(1)?.clone()).ok()?;
            Some(NodeNotification::BlockConnected { hash, height })
        }
        "chainreorg" => {
            let old_tip: Hash = serde_json::from_value(frame.params.get(0)?.clone()).ok()?;
            let new_tip: Hash = serde_json::from_value(frame.params.get(1)?.clone()).ok()?;
            Some(NodeNotification::Reorg { old_tip, new_tip })
        }
        _ => None,
    }
}

// --- chain walks ---

#[derive(Error, Debug)]
pub enum ChainWalkError {
    #[error("no ancestor: at genesis")]
    AtGenesis,

    #[error("no ancestor: max chain length reached")]
    MaxChainLength,

    #[error("RPC error during chain walk: {0}")]
    Rpc(#[from] RpcError),
}

/// Determine the common ancestor of the chains tipped by `hash_a` and
/// `hash_b`, walking both backwards through the node's headers. Returns the
/// ancestor plus both branches ordered oldest to tip, excluding the
/// ancestor itself. The ancestor is never one of the input tips: equal
/// inputs yield the shared block in both branches with its parent as the
/// ancestor.
pub async fn common_ancestor(
    node: &dyn NodeApi,
    hash_a: Hash,
    hash_b: Hash,
) -> Result<(Hash, Vec<Hash>, Vec<Hash>), ChainWalkError> {
    common_ancestor_within(node, hash_a, hash_b, MAX_ANCESTOR_CHAIN_LENGTH).await
}

/// [`common_ancestor`] with an explicit bound on the combined walk length.
pub async fn common_ancestor_within(
    node: &dyn NodeApi,
    mut hash_a: Hash,
    mut hash_b: Hash,
    max_length: usize,
) -> Result<(Hash, Vec<Hash>, Vec<Hash>), ChainWalkError> {
    let mut length = 0usize;
    let mut chain_a: Vec<Hash> = Vec::new();
    let mut chain_b: Vec<Hash> = Vec::new();

    loop {
        if length >= max_length {
            return Err(ChainWalkError::MaxChainLength);
        }

        let header_a = node.block_header(hash_a).await?;
        let header_b = node.block_header(hash_b).await?;

        // Reach the same height on both chains before testing for
        // convergence. At least one previous block is consumed per side so
        // an input tip is never reported as the ancestor.
        if header_a.header.height > header_b.header.height {
            chain_a.insert(0, hash_a);
            length += 1;
            hash_a = header_a.header.prev_block;
            continue;
        }
        if header_b.header.height > header_a.header.height {
            chain_b.insert(0, hash_b);
            length += 1;
            hash_b = header_b.header.prev_block;
            continue;
        }

        chain_a.insert(0, hash_a);
        chain_b.insert(0, hash_b);
        length += 1;

        if header_a.header.prev_block.is_zero() {
            return Err(ChainWalkError::AtGenesis);
        }

        hash_a = header_a.header.prev_block;
        hash_b = header_b.header.prev_block;

        if hash_a == hash_b {
            return Ok((hash_a, chain_a, chain_b));
        }
    }
}

/// Known side chain tips: the `getchaintips` results whose status is
/// valid-headers or valid-fork.
pub async fn side_chains(node: &dyn NodeApi) -> Result<Vec<ChainTip>, RpcError> {
    let tips = node.chain_tips().await?;
    Ok(tips
        .into_iter()
        .filter(|t| matches!(t.status, TipStatus::ValidHeaders | TipStatus::ValidFork))
        .collect())
}

/// All blocks of the side chain ending in `tip_hash`, lowest height first.
/// The first block's parent is the main/side common ancestor, which is not
/// included since it is main chain. Main-chain headers have
/// `confirmations != -1`.
pub async fn side_chain_full(node: &dyn NodeApi, tip_hash: Hash) -> Result<Vec<Hash>, RpcError> {
    let mut side_chain = Vec::new();
    let mut hash = tip_hash;
    loop {
        let header = node.block_header(hash).await?;
        if header.confirmations != -1 {
            if hash == tip_hash {
                return Err(RpcError::Protocol(format!(
                    "tip block {tip_hash} is not on a side chain"
                )));
            }
            break;
        }
        side_chain.push(hash);
        hash = header.header.prev_block;
    }
    side_chain.reverse();
    Ok(side_chain)
}
