//! Mock Solana JSON-RPC server
//!
//! Simulates the three RPC methods the keeper calls without a real validator.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct MockRpcServer {
    pub server: MockServer,
}

impl MockRpcServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Respond to getIdentity with the given pubkey.
    pub async fn mock_identity(&self, identity: &str) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "getIdentity"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"identity": identity}
            })))
            .mount(&self.server)
            .await;
    }

    /// Respond to getSlot with the given slot.
    pub async fn mock_slot(&self, slot: u64) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "getSlot"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": slot
            })))
            .mount(&self.server)
            .await;
    }

    /// Respond to getClusterNodes with nodes pointing at the given RPC
    /// addresses (scheme-less, the way gossip reports them).
    pub async fn mock_cluster_nodes(&self, rpc_addresses: &[&str]) {
        let nodes: Vec<_> = rpc_addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                json!({
                    "pubkey": format!("Node{}", i),
                    "gossip": "127.0.0.1:8001",
                    "rpc": addr,
                    "version": "2.1.0"
                })
            })
            .collect();

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "getClusterNodes"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": nodes
            })))
            .mount(&self.server)
            .await;
    }

    /// Respond to a method with a JSON-RPC error envelope.
    pub async fn mock_rpc_error(&self, rpc_method: &str, code: i64, message: &str) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": rpc_method})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": code, "message": message}
            })))
            .mount(&self.server)
            .await;
    }
}
