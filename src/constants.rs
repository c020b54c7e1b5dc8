//! Application-wide constants for timeouts, intervals, and cluster endpoints

use std::time::Duration;

/// Known cluster names and their public RPC endpoints
pub mod cluster {
    pub const MAINNET_BETA: &str = "mainnet-beta";
    pub const TESTNET: &str = "testnet";

    pub const VALID_CLUSTERS: [&str; 2] = [MAINNET_BETA, TESTNET];

    /// Public RPC endpoint for a cluster name, if it is one we know about.
    pub fn rpc_url(name: &str) -> Option<&'static str> {
        match name {
            MAINNET_BETA => Some("https://api.mainnet-beta.solana.com"),
            TESTNET => Some("https://api.testnet.solana.com"),
            _ => None,
        }
    }

    pub fn is_valid(name: &str) -> bool {
        VALID_CLUSTERS.contains(&name)
    }
}

/// HTTP and RPC timing constants
pub mod http {
    use super::Duration;

    /// Timeout for JSON-RPC requests to validators
    pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Orchestration timing constants
pub mod timing {
    use super::Duration;

    /// How often the identity monitor re-checks the local validator role
    pub const IDENTITY_POLL_INTERVAL: Duration = Duration::from_secs(30);

    /// How often discovery logs probe progress
    pub const PROBE_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

    /// How often the download progress bar is refreshed
    pub const PROGRESS_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

    /// Nominal wall-clock length of one cluster slot
    pub const SLOT_DURATION: Duration = Duration::from_millis(400);
}

/// On-disk artifact names inside the snapshot directory
pub mod files {
    /// Single-instance lock file
    pub const LOCK_FILENAME: &str = "solana-validator-snapshot-keeper.lock";

    /// Transient file used to verify the snapshot directory is writable
    pub const WRITE_PROBE_FILENAME: &str = ".snapshot-keeper-probe";
}

/// Download tuning constants
pub mod download {
    /// How many candidates to try for the optional incremental follow-up
    pub const MAX_INCREMENTAL_FOLLOWUP_CANDIDATES: usize = 3;
}

/// Render a slot count as a human time span at the nominal slot duration.
pub fn slots_to_time(slots: u64) -> String {
    let secs = (slots as f64 * timing::SLOT_DURATION.as_secs_f64()).round() as u64;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_rpc_urls() {
        assert_eq!(
            cluster::rpc_url("mainnet-beta"),
            Some("https://api.mainnet-beta.solana.com")
        );
        assert_eq!(
            cluster::rpc_url("testnet"),
            Some("https://api.testnet.solana.com")
        );
        assert_eq!(cluster::rpc_url("devnet"), None);
    }

    #[test]
    fn slots_to_time_uses_nominal_slot_duration() {
        // 1300 slots at 400ms = 520s = 8m 40s
        assert_eq!(slots_to_time(1300), "8m 40s");
        assert_eq!(slots_to_time(0), "0s");
    }
}
