//! Test configuration builder

use std::path::Path;
use std::time::Duration;

use snapshot_keeper::config::Config;

/// A config wired to mock servers: generous probe latency so local mock
/// round-trips never trip the filter, speed gate disabled, small connection
/// count.
pub fn test_config(snapshot_dir: &Path, local_rpc_url: &str, cluster_rpc_url: &str) -> Config {
    let mut config = Config::default();

    config.validator.rpc_url = local_rpc_url.to_string();
    config.validator.active_identity_pubkey = "ActivePubkey".to_string();
    config.cluster.name = "testnet".to_string();
    config.cluster.rpc_url = cluster_rpc_url.to_string();

    config.snapshots.directory = snapshot_dir.to_str().unwrap().to_string();
    config.snapshots.discovery.probe.concurrency = 10;
    config.snapshots.discovery.probe.max_latency = "5s".to_string();
    config.snapshots.discovery.probe.max_latency_duration = Duration::from_secs(5);

    config.snapshots.download.min_speed_bytes = 0;
    config.snapshots.download.min_speed_check_delay_duration = Duration::ZERO;
    config.snapshots.download.connections = 2;
    config.snapshots.download.timeout_duration = Duration::from_secs(60);

    config
}
