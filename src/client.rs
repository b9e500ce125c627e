//! Daemon client for mining operations
//!
//! Fetches block templates, submits mined blocks and reads the chain head over
//! the daemon's JSON-RPC endpoint.

use crate::{BlockMiningParameters, BlockTemplate, Error, Hash, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

/// Status string the daemon reports for a successful call
pub const CORE_RPC_STATUS_OK: &str = "OK";

/// Request/response boundary to the daemon
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Fetch a block template paying out to `address` together with its difficulty
    async fn get_mining_parameters(&self, address: &str) -> Result<BlockMiningParameters>;

    /// Submit a solved block
    async fn submit_block(&self, block: &BlockTemplate) -> Result<()>;

    /// Hash of the daemon's current chain head
    async fn last_block_hash(&self) -> Result<Hash>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct GetBlockTemplateRequest<'a> {
    wallet_address: &'a str,
    reserve_size: u64,
}

#[derive(Debug, Deserialize)]
struct GetBlockTemplateResponse {
    status: String,
    difficulty: u64,
    blocktemplate_blob: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    hash: String,
    #[serde(default)]
    height: u64,
}

#[derive(Debug, Deserialize)]
struct GetLastBlockHeaderResponse {
    status: String,
    block_header: BlockHeader,
}

/// JSON-RPC daemon client.
///
/// Every call holds `http_gate` for the whole HTTP exchange, so at most one
/// request to the daemon is in flight at a time.
#[derive(Debug)]
pub struct RpcDaemonClient {
    client: Client,
    endpoint: Url,
    http_gate: Mutex<()>,
}

impl RpcDaemonClient {
    /// Create a client for the daemon at `base_url`
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| Error::config(format!("Invalid daemon URL: {}", e)))?;
        let endpoint = base_url
            .join("json_rpc")
            .map_err(|e| Error::config(format!("Failed to build RPC URL: {}", e)))?;

        let client = ClientBuilder::new().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            http_gate: Mutex::new(()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn invoke<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        };

        let _guard = self.http_gate.lock().await;
        debug!("Calling {} at {}", method, self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(Error::from_transport)?;

        if !response.status().is_success() {
            return Err(Error::protocol(format!(
                "{} failed: HTTP {}",
                method,
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(Error::from_transport)?;
        let reply: JsonRpcResponse<R> = serde_json::from_slice(&body)
            .map_err(|e| Error::protocol(format!("Malformed {} response: {}", method, e)))?;

        match (reply.result, reply.error) {
            (_, Some(error)) => Err(Error::protocol(format!(
                "{} returned error {}: {}",
                method, error.code, error.message
            ))),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::protocol(format!("{} returned no result", method))),
        }
    }
}

fn check_status(method: &str, status: &str) -> Result<()> {
    if status == CORE_RPC_STATUS_OK {
        Ok(())
    } else {
        Err(Error::protocol(format!(
            "{} status is not OK: {}",
            method, status
        )))
    }
}

#[async_trait]
impl DaemonClient for RpcDaemonClient {
    #[instrument(skip(self))]
    async fn get_mining_parameters(&self, address: &str) -> Result<BlockMiningParameters> {
        let response: GetBlockTemplateResponse = self
            .invoke(
                "getblocktemplate",
                GetBlockTemplateRequest {
                    wallet_address: address,
                    reserve_size: 0,
                },
            )
            .await?;
        check_status("getblocktemplate", &response.status)?;

        let block_template = BlockTemplate::from_hex(&response.blocktemplate_blob)
            .map_err(|e| Error::protocol(format!("Couldn't deserialize block template: {}", e)))?;

        debug!(
            difficulty = response.difficulty,
            major_version = block_template.major_version,
            "Received block template"
        );

        Ok(BlockMiningParameters {
            difficulty: response.difficulty,
            block_template,
        })
    }

    #[instrument(skip(self, block), fields(timestamp = block.timestamp, nonce = block.nonce))]
    async fn submit_block(&self, block: &BlockTemplate) -> Result<()> {
        let blob = block.to_hex()?;
        let response: StatusResponse = self.invoke("submitblock", [blob]).await?;
        check_status("submitblock", &response.status)
    }

    #[instrument(skip(self))]
    async fn last_block_hash(&self) -> Result<Hash> {
        let response: GetLastBlockHeaderResponse = self
            .invoke("getlastblockheader", serde_json::json!({}))
            .await?;
        check_status("getlastblockheader", &response.status)?;

        debug!(height = response.block_header.height, "Daemon chain head");
        Hash::from_str(&response.block_header.hash)
            .map_err(|e| Error::protocol(format!("Invalid block hash from daemon: {}", e)))
    }
}
