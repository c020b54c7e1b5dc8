pub mod config;
pub mod constants;
pub mod discovery;
pub mod downloader;
pub mod hooks;
pub mod keeper;
pub mod lock;
pub mod rpc;
pub mod runner;
pub mod snapshot;

// Re-export commonly used types
pub use config::Config;
pub use discovery::{PairedSnapshotNode, SnapshotKind, SnapshotNode};
pub use downloader::DownloadResult;
pub use keeper::Keeper;
pub use lock::InstanceLock;
pub use rpc::RpcClient;
pub use runner::Runner;
