//! Reusable test utilities:
//! - Mock JSON-RPC servers (local validator and cluster entrypoint)
//! - Mock snapshot HTTP servers (HEAD redirects, ranged GET bodies)
//! - Test configuration builders

// Allow unused code in test fixtures - not every test uses every helper
#![allow(dead_code)]

pub mod mock_rpc;
pub mod mock_snapshot_server;
pub mod test_config;

pub use mock_rpc::MockRpcServer;
pub use mock_snapshot_server::MockSnapshotServer;
pub use test_config::test_config;
