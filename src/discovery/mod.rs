//! Cluster snapshot discovery
//!
//! Probes the RPC endpoints of cluster nodes with HEAD requests to find out
//! which of them serve a snapshot we would want, without ever following the
//! redirect: the Location header is what carries the filename.

use anyhow::anyhow;
use futures::future::join_all;
use reqwest::{redirect, Client, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::{self, slots_to_time};
use crate::rpc::ClusterNode;
use crate::snapshot::filename::parse_probed_filename;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Full,
    Incremental,
}

impl SnapshotKind {
    /// The well-known endpoint a node redirects to its latest snapshot of
    /// this kind.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Full => "/snapshot.tar.bz2",
            Self::Incremental => "/incremental-snapshot.tar.bz2",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// A node that serves a snapshot, along with probe metadata.
#[derive(Debug, Clone)]
pub struct SnapshotNode {
    pub rpc_url: String,
    pub snapshot_url: String,
    pub kind: SnapshotKind,
    pub slot: u64,
    /// Only meaningful for incremental snapshots; 0 for fulls.
    pub base_slot: u64,
    pub filename: String,
    pub latency: Duration,
    pub slot_age: u64,
}

/// A node serving both a full and an incremental whose base slot matches.
#[derive(Debug, Clone)]
pub struct PairedSnapshotNode {
    pub full: SnapshotNode,
    pub incremental: SnapshotNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Latency,
    SlotAge,
}

impl SortOrder {
    pub fn from_config(s: &str) -> Self {
        match s {
            "slot_age" => Self::SlotAge,
            _ => Self::Latency,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub max_latency: Duration,
    /// 0 disables the age filter (used for the full half of paired probes).
    pub max_snapshot_age_slots: u64,
    pub probe_concurrency: usize,
    pub sort_order: SortOrder,
    /// Stop probing early once this many suitable nodes are found (0 = probe all).
    pub min_suitable: usize,
}

/// Why a probed node was rejected.
#[derive(Debug)]
pub enum ProbeRejection {
    HttpError(String),
    LatencyExceeded(Duration),
    BadStatus(u16),
    ParseFailure(String),
    TooOld(u64),
    SlotAheadOfTip { slot: u64, tip: u64 },
}

impl fmt::Display for ProbeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpError(e) => write!(f, "executing request: {}", e),
            Self::LatencyExceeded(latency) => {
                write!(f, "latency {:?} exceeds maximum", latency)
            }
            Self::BadStatus(code) => write!(f, "unexpected status {}", code),
            Self::ParseFailure(e) => write!(f, "{}", e),
            Self::TooOld(age) => write!(f, "slot age {} exceeds maximum", age),
            Self::SlotAheadOfTip { slot, tip } => {
                write!(f, "snapshot slot {} is ahead of current slot {}", slot, tip)
            }
        }
    }
}

impl std::error::Error for ProbeRejection {}

/// Build the HTTP client used for probing: redirects disabled so the
/// Location header survives, request timeout proportional to the latency cap.
pub fn probe_client(max_latency: Duration) -> Client {
    Client::builder()
        .timeout(max_latency * 3)
        .redirect(redirect::Policy::none())
        .build()
        .expect("failed to build probe HTTP client")
}

/// Probe a single node for a snapshot of the expected kind.
pub async fn probe_node(
    client: &Client,
    addr: &str,
    current_slot: u64,
    kind: SnapshotKind,
    opts: &DiscoveryOptions,
) -> Result<SnapshotNode, ProbeRejection> {
    let url = format!("{}{}", addr, kind.endpoint());

    let start = Instant::now();
    let response = client
        .head(&url)
        .send()
        .await
        .map_err(|e| ProbeRejection::HttpError(e.to_string()))?;
    let latency = start.elapsed();

    if latency > opts.max_latency {
        return Err(ProbeRejection::LatencyExceeded(latency));
    }

    let status = response.status();
    let filename = match status {
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::SEE_OTHER
        | StatusCode::TEMPORARY_REDIRECT => {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ProbeRejection::BadStatus(status.as_u16()))?;
            last_path_segment(location).to_string()
        }
        StatusCode::OK => last_path_segment(kind.endpoint()).to_string(),
        other => return Err(ProbeRejection::BadStatus(other.as_u16())),
    };

    let parsed = parse_probed_filename(&filename, kind == SnapshotKind::Incremental)
        .map_err(|e| ProbeRejection::ParseFailure(e.to_string()))?;

    let slot = parsed.slot();
    if slot > current_slot {
        return Err(ProbeRejection::SlotAheadOfTip {
            slot,
            tip: current_slot,
        });
    }
    let slot_age = current_slot - slot;
    if opts.max_snapshot_age_slots > 0 && slot_age > opts.max_snapshot_age_slots {
        return Err(ProbeRejection::TooOld(slot_age));
    }

    Ok(SnapshotNode {
        rpc_url: addr.to_string(),
        snapshot_url: format!("{}/{}", addr, filename),
        kind,
        slot,
        base_slot: parsed.base_slot(),
        filename,
        latency,
        slot_age,
    })
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// RPC addresses of nodes that expose one, scheme-prefixed when missing.
fn extract_rpc_addresses(nodes: &[ClusterNode]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| n.rpc.as_deref())
        .filter(|addr| !addr.is_empty())
        .map(|addr| {
            if addr.contains("://") {
                addr.to_string()
            } else {
                format!("http://{}", addr)
            }
        })
        .collect()
}

/// Per-kind rejection counters for one discovery cycle.
#[derive(Default)]
struct RejectionCounters {
    http_error: AtomicU64,
    latency: AtomicU64,
    bad_status: AtomicU64,
    parse_failure: AtomicU64,
    too_old: AtomicU64,
    ahead_of_tip: AtomicU64,
    status_codes: Mutex<HashMap<u16, u64>>,
    too_old_min_age: AtomicU64,
    too_old_max_age: AtomicU64,
}

impl RejectionCounters {
    fn new() -> Self {
        let counters = Self::default();
        counters.too_old_min_age.store(u64::MAX, Ordering::Relaxed);
        counters
    }

    fn record(&self, rejection: &ProbeRejection) {
        match rejection {
            ProbeRejection::HttpError(_) => {
                self.http_error.fetch_add(1, Ordering::Relaxed);
            }
            ProbeRejection::LatencyExceeded(_) => {
                self.latency.fetch_add(1, Ordering::Relaxed);
            }
            ProbeRejection::BadStatus(code) => {
                self.bad_status.fetch_add(1, Ordering::Relaxed);
                let mut codes = self.status_codes.lock().unwrap();
                *codes.entry(*code).or_insert(0) += 1;
            }
            ProbeRejection::ParseFailure(_) => {
                self.parse_failure.fetch_add(1, Ordering::Relaxed);
            }
            ProbeRejection::TooOld(age) => {
                self.too_old.fetch_add(1, Ordering::Relaxed);
                self.too_old_min_age.fetch_min(*age, Ordering::Relaxed);
                self.too_old_max_age.fetch_max(*age, Ordering::Relaxed);
            }
            ProbeRejection::SlotAheadOfTip { .. } => {
                self.ahead_of_tip.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn log_summary(&self) {
        let min_age = self.too_old_min_age.load(Ordering::Relaxed);
        let max_age = self.too_old_max_age.load(Ordering::Relaxed);
        let status_codes = self.status_codes.lock().unwrap();

        if min_age != u64::MAX {
            debug!(
                http_error = self.http_error.load(Ordering::Relaxed),
                latency = self.latency.load(Ordering::Relaxed),
                bad_status = self.bad_status.load(Ordering::Relaxed),
                parse_failure = self.parse_failure.load(Ordering::Relaxed),
                too_old = self.too_old.load(Ordering::Relaxed),
                ahead_of_tip = self.ahead_of_tip.load(Ordering::Relaxed),
                status_codes = ?*status_codes,
                too_old_min_slots = min_age,
                too_old_max_slots = max_age,
                too_old_min_time = %slots_to_time(min_age),
                too_old_max_time = %slots_to_time(max_age),
                "probe rejections"
            );
        } else {
            debug!(
                http_error = self.http_error.load(Ordering::Relaxed),
                latency = self.latency.load(Ordering::Relaxed),
                bad_status = self.bad_status.load(Ordering::Relaxed),
                parse_failure = self.parse_failure.load(Ordering::Relaxed),
                too_old = self.too_old.load(Ordering::Relaxed),
                ahead_of_tip = self.ahead_of_tip.load(Ordering::Relaxed),
                status_codes = ?*status_codes,
                "probe rejections"
            );
        }
    }
}

fn spawn_progress_logger(
    token: CancellationToken,
    label: &'static str,
    probed: Arc<AtomicU64>,
    suitable: Arc<AtomicU64>,
    total: usize,
) {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(constants::timing::PROBE_PROGRESS_INTERVAL);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let done = probed.load(Ordering::Relaxed);
                    let pct = if total > 0 { done as f64 / total as f64 * 100.0 } else { 100.0 };
                    info!(
                        suitable = suitable.load(Ordering::Relaxed),
                        elapsed = ?start.elapsed(),
                        "{} progress ({}/{}, {:.1}%)", label, done, total, pct,
                    );
                }
                _ = token.cancelled() => return,
            }
        }
    });
}

/// Probe cluster nodes for snapshot availability, returning suitable nodes
/// sorted by the configured order. Probing stops early once `min_suitable`
/// nodes are found or the caller's token is cancelled.
pub async fn discover_nodes(
    nodes: &[ClusterNode],
    current_slot: u64,
    kind: SnapshotKind,
    opts: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Vec<SnapshotNode> {
    let addresses = extract_rpc_addresses(nodes);
    info!(candidates = addresses.len(), "probing nodes for {} snapshots", kind);

    let start = Instant::now();
    let mut results = probe_nodes(addresses, current_slot, kind, opts, cancel).await;
    sort_nodes(&mut results, opts.sort_order);

    info!(
        elapsed = ?start.elapsed(),
        suitable = results.len(),
        "{} snapshot probes complete", kind,
    );
    results
}

async fn probe_nodes(
    addresses: Vec<String>,
    current_slot: u64,
    kind: SnapshotKind,
    opts: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Vec<SnapshotNode> {
    let total = addresses.len();
    let client = probe_client(opts.max_latency);
    let semaphore = Arc::new(Semaphore::new(opts.probe_concurrency.max(1)));
    let results = Arc::new(Mutex::new(Vec::new()));
    let probed = Arc::new(AtomicU64::new(0));
    let suitable = Arc::new(AtomicU64::new(0));
    let counters = Arc::new(RejectionCounters::new());
    let early_stop = Arc::new(AtomicBool::new(false));

    let token = cancel.child_token();
    spawn_progress_logger(
        token.clone(),
        "probe",
        probed.clone(),
        suitable.clone(),
        total,
    );

    let mut tasks = Vec::with_capacity(total);
    for (index, addr) in addresses.into_iter().enumerate() {
        let client = client.clone();
        let semaphore = semaphore.clone();
        let results = results.clone();
        let probed = probed.clone();
        let suitable = suitable.clone();
        let counters = counters.clone();
        let early_stop = early_stop.clone();
        let token = token.clone();
        let opts = opts.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.expect("semaphore closed"),
                _ = token.cancelled() => {
                    probed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            debug!(addr = %addr, "probing node {} of {}", index + 1, total);
            let outcome = tokio::select! {
                outcome = probe_node(&client, &addr, current_slot, kind, &opts) => outcome,
                _ = token.cancelled() => {
                    probed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            probed.fetch_add(1, Ordering::Relaxed);

            match outcome {
                Ok(node) => {
                    let n = suitable.fetch_add(1, Ordering::Relaxed) + 1;
                    results.lock().unwrap().push(node);

                    if opts.min_suitable > 0
                        && n as usize >= opts.min_suitable
                        && !early_stop.swap(true, Ordering::SeqCst)
                    {
                        info!(
                            suitable = n,
                            min_suitable = opts.min_suitable,
                            "minimum suitable nodes found, stopping further probes"
                        );
                        token.cancel();
                    }
                }
                Err(rejection) => {
                    counters.record(&rejection);
                    debug!(addr = %addr, error = %rejection, "probe failed");
                }
            }
        }));
    }

    join_all(tasks).await;
    token.cancel();

    let collected = {
        let mut guard = results.lock().unwrap();
        std::mem::take(&mut *guard)
    };
    if collected.len() < total {
        counters.log_summary();
    }
    collected
}

fn sort_nodes(nodes: &mut [SnapshotNode], order: SortOrder) {
    match order {
        SortOrder::Latency => nodes.sort_by_key(|n| n.latency),
        SortOrder::SlotAge => nodes.sort_by_key(|n| n.slot_age),
    }
}

/// Discover incremental snapshots whose base slot matches a local full.
pub async fn discover_incremental_for_base(
    nodes: &[ClusterNode],
    current_slot: u64,
    base_slot: u64,
    opts: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Vec<SnapshotNode> {
    let all = discover_nodes(nodes, current_slot, SnapshotKind::Incremental, opts, cancel).await;
    let total = all.len();

    let matching: Vec<_> = all.into_iter().filter(|n| n.base_slot == base_slot).collect();
    info!(
        matching = matching.len(),
        candidates = total,
        base_slot,
        "filtered incremental candidates for base slot"
    );
    matching
}

/// Probe cluster nodes for paired full+incremental availability. The full
/// half runs with the age filter disabled (only the incremental must be
/// fresh) and the incremental base slot must equal the full snapshot slot.
pub async fn discover_paired_nodes(
    nodes: &[ClusterNode],
    current_slot: u64,
    opts: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Vec<PairedSnapshotNode> {
    let addresses = extract_rpc_addresses(nodes);
    info!(candidates = addresses.len(), "probing nodes for paired snapshots");

    let start = Instant::now();
    let mut results = probe_paired_nodes(addresses, current_slot, opts, cancel).await;
    sort_paired_nodes(&mut results, opts.sort_order);

    info!(
        suitable = results.len(),
        elapsed = ?start.elapsed(),
        "paired discovery complete"
    );
    results
}

async fn probe_paired_node(
    client: &Client,
    addr: &str,
    current_slot: u64,
    opts: &DiscoveryOptions,
) -> Result<PairedSnapshotNode, (PairedRejection, anyhow::Error)> {
    let mut full_opts = opts.clone();
    full_opts.max_snapshot_age_slots = 0;

    let full = probe_node(client, addr, current_slot, SnapshotKind::Full, &full_opts)
        .await
        .map_err(|e| (PairedRejection::FullFailed, anyhow!("full probe: {}", e)))?;

    let incremental = probe_node(client, addr, current_slot, SnapshotKind::Incremental, opts)
        .await
        .map_err(|e| (PairedRejection::IncrementalFailed, anyhow!("incremental probe: {}", e)))?;

    if incremental.base_slot != full.slot {
        return Err((
            PairedRejection::BaseSlotMismatch,
            anyhow!(
                "base slot mismatch: incremental base {} != full slot {}",
                incremental.base_slot,
                full.slot
            ),
        ));
    }

    Ok(PairedSnapshotNode { full, incremental })
}

#[derive(Debug, Clone, Copy)]
enum PairedRejection {
    FullFailed,
    IncrementalFailed,
    BaseSlotMismatch,
}

async fn probe_paired_nodes(
    addresses: Vec<String>,
    current_slot: u64,
    opts: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Vec<PairedSnapshotNode> {
    let total = addresses.len();
    let client = probe_client(opts.max_latency);
    let semaphore = Arc::new(Semaphore::new(opts.probe_concurrency.max(1)));
    let results = Arc::new(Mutex::new(Vec::new()));
    let probed = Arc::new(AtomicU64::new(0));
    let suitable = Arc::new(AtomicU64::new(0));
    let full_failed = Arc::new(AtomicU64::new(0));
    let incremental_failed = Arc::new(AtomicU64::new(0));
    let base_mismatch = Arc::new(AtomicU64::new(0));
    let early_stop = Arc::new(AtomicBool::new(false));

    let token = cancel.child_token();
    spawn_progress_logger(
        token.clone(),
        "paired probe",
        probed.clone(),
        suitable.clone(),
        total,
    );

    let mut tasks = Vec::with_capacity(total);
    for (index, addr) in addresses.into_iter().enumerate() {
        let client = client.clone();
        let semaphore = semaphore.clone();
        let results = results.clone();
        let probed = probed.clone();
        let suitable = suitable.clone();
        let full_failed = full_failed.clone();
        let incremental_failed = incremental_failed.clone();
        let base_mismatch = base_mismatch.clone();
        let early_stop = early_stop.clone();
        let token = token.clone();
        let opts = opts.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.expect("semaphore closed"),
                _ = token.cancelled() => {
                    probed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            debug!(addr = %addr, "probing node {} of {} for paired snapshots", index + 1, total);
            let outcome = tokio::select! {
                outcome = probe_paired_node(&client, &addr, current_slot, &opts) => outcome,
                _ = token.cancelled() => {
                    probed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            probed.fetch_add(1, Ordering::Relaxed);

            match outcome {
                Ok(pair) => {
                    let n = suitable.fetch_add(1, Ordering::Relaxed) + 1;
                    results.lock().unwrap().push(pair);

                    if opts.min_suitable > 0
                        && n as usize >= opts.min_suitable
                        && !early_stop.swap(true, Ordering::SeqCst)
                    {
                        info!(
                            suitable = n,
                            min_suitable = opts.min_suitable,
                            "minimum suitable paired candidates found, stopping probes"
                        );
                        token.cancel();
                    }
                }
                Err((reason, error)) => {
                    match reason {
                        PairedRejection::FullFailed => full_failed.fetch_add(1, Ordering::Relaxed),
                        PairedRejection::IncrementalFailed => {
                            incremental_failed.fetch_add(1, Ordering::Relaxed)
                        }
                        PairedRejection::BaseSlotMismatch => {
                            base_mismatch.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                    debug!(addr = %addr, error = %error, "paired probe failed");
                }
            }
        }));
    }

    join_all(tasks).await;
    token.cancel();

    let collected = {
        let mut guard = results.lock().unwrap();
        std::mem::take(&mut *guard)
    };
    if collected.len() < total {
        info!(
            full_failed = full_failed.load(Ordering::Relaxed),
            incremental_failed = incremental_failed.load(Ordering::Relaxed),
            base_slot_mismatch = base_mismatch.load(Ordering::Relaxed),
            "paired probe rejections"
        );
    }
    collected
}

fn sort_paired_nodes(nodes: &mut [PairedSnapshotNode], order: SortOrder) {
    match order {
        SortOrder::Latency => nodes.sort_by_key(|n| n.full.latency + n.incremental.latency),
        SortOrder::SlotAge => nodes.sort_by_key(|n| n.incremental.slot_age),
    }
}
