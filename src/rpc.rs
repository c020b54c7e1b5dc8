//! Minimal Solana JSON-RPC client
//!
//! Covers the three methods the keeper needs: getIdentity, getSlot and
//! getClusterNodes. Anything else is out of scope.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::constants;

#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A node in the cluster as returned by getClusterNodes. The rpc field is
/// absent for nodes that do not expose an RPC port.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterNode {
    pub pubkey: String,
    pub gossip: Option<String>,
    pub rpc: Option<String>,
    pub version: Option<String>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(constants::http::RPC_TIMEOUT)
            .build()
            .expect("failed to build RPC HTTP client");

        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str) -> Result<Value> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [],
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| anyhow!("{} request to {} failed: {}", method, self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned HTTP {}: {}", method, status, body));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse {} response: {}", method, e))?;

        if let Some(error) = rpc_response.error {
            return Err(anyhow!("RPC error {}: {}", error.code, error.message));
        }

        rpc_response
            .result
            .ok_or_else(|| anyhow!("{} response missing result", method))
    }

    /// The identity pubkey the local validator is currently running with.
    pub async fn get_identity(&self) -> Result<String> {
        let result = self.call("getIdentity").await?;
        let identity = result
            .get("identity")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("unexpected getIdentity result: {}", result))?
            .to_string();

        debug!(pubkey = %identity, "got identity");
        Ok(identity)
    }

    /// The cluster's current slot.
    pub async fn get_slot(&self) -> Result<u64> {
        let result = self.call("getSlot").await?;
        let slot = result
            .as_u64()
            .ok_or_else(|| anyhow!("unexpected getSlot result: {}", result))?;

        debug!(slot, "got slot");
        Ok(slot)
    }

    /// All nodes currently visible in the cluster.
    pub async fn get_cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        let result = self.call("getClusterNodes").await?;
        let nodes: Vec<ClusterNode> = serde_json::from_value(result)
            .map_err(|e| anyhow!("failed to parse getClusterNodes result: {}", e))?;

        debug!(count = nodes.len(), "got cluster nodes");
        Ok(nodes)
    }
}
