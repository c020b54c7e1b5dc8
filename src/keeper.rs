//! Snapshot keeper orchestration
//!
//! One `run` is one cycle: check the validator role, assess local freshness,
//! discover candidates, download, prune, run hooks. The identity is
//! re-checked in the background during downloads so a failover aborts the
//! transfer instead of competing with a now-active validator.

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{format_size, Config};
use crate::constants::{self, slots_to_time};
use crate::discovery::{
    self, DiscoveryOptions, PairedSnapshotNode, SnapshotKind, SnapshotNode, SortOrder,
};
use crate::downloader::{self, DownloadOptions, DownloadResult};
use crate::hooks::{self, TemplateData};
use crate::rpc::{ClusterNode, RpcClient};
use crate::snapshot::{inventory, pruner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    Skip,
    Incremental,
    Full,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorRole {
    Active,
    Passive,
    Unknown,
}

impl ValidatorRole {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::Unknown => "unknown",
        }
    }
}

pub struct Keeper {
    config: Arc<Config>,
    local_rpc: RpcClient,
    cluster_rpc: RpcClient,
}

impl Keeper {
    pub fn new(config: Arc<Config>) -> Self {
        let local_rpc = RpcClient::new(config.validator.rpc_url.clone());
        let cluster_rpc = RpcClient::new(config.cluster.effective_rpc_url());
        Self {
            config,
            local_rpc,
            cluster_rpc,
        }
    }

    fn discovery_options(&self) -> DiscoveryOptions {
        let d = &self.config.snapshots.discovery;
        DiscoveryOptions {
            max_latency: d.probe.max_latency_duration,
            max_snapshot_age_slots: self.config.snapshots.age.remote.max_slots,
            probe_concurrency: d.probe.concurrency,
            sort_order: SortOrder::from_config(&d.candidates.sort_order),
            min_suitable: 0,
        }
    }

    fn download_options(&self) -> DownloadOptions {
        let d = &self.config.snapshots.download;
        DownloadOptions {
            min_speed_bytes: d.min_speed_bytes,
            min_speed_check_delay: d.min_speed_check_delay_duration,
            connections: d.connections,
            timeout: d.timeout_duration,
        }
    }

    fn snapshot_dir(&self) -> &Path {
        Path::new(&self.config.snapshots.directory)
    }

    /// Execute one snapshot keeping cycle.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let role = self.check_role().await;
        if role == ValidatorRole::Active {
            info!("validator is active, skipping snapshot download");
            return Ok(());
        }
        info!(role = role.as_str(), "validator role checked");

        let current_slot = match self.cluster_rpc.get_slot().await {
            Ok(slot) => slot,
            Err(e) => {
                return self
                    .run_failure_hooks(role, anyhow!("getting current slot: {}", e))
                    .await
            }
        };

        let (mut mode, local_full_slot) = self.assess_freshness(current_slot);
        if mode == DownloadMode::Skip {
            info!("local snapshots within configured freshness thresholds - nothing to do");
            return Ok(());
        }
        debug!(current_slot, "{} download mode determined", mode);

        let cluster_nodes = match self.cluster_rpc.get_cluster_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                return self
                    .run_failure_hooks(role, anyhow!("getting cluster nodes: {}", e))
                    .await
            }
        };

        let base_opts = self.discovery_options();
        let dl_opts = self.download_options();

        // Downloads run under a child token the identity monitor can cancel
        // if the validator becomes active mid-transfer.
        let download_token = cancel.child_token();
        let _monitor_guard = download_token.clone().drop_guard();
        self.spawn_identity_monitor(download_token.clone());

        let mut candidates: Vec<SnapshotNode> = Vec::new();

        if mode == DownloadMode::Incremental {
            let mut opts = base_opts.clone();
            opts.min_suitable = self.config.snapshots.discovery.candidates.min_suitable_incremental;
            candidates = discovery::discover_incremental_for_base(
                &cluster_nodes,
                current_slot,
                local_full_slot,
                &opts,
                &download_token,
            )
            .await;

            if candidates.is_empty() {
                info!("no matching incrementals found, falling back to full download");
                mode = DownloadMode::Full;
            }
        }

        let mut result: Option<DownloadResult> = None;
        let mut selected: Option<SnapshotNode> = None;
        let mut paired_done = false;

        if mode == DownloadMode::Full {
            match self
                .try_paired_full_download(
                    &cluster_nodes,
                    current_slot,
                    local_full_slot,
                    &base_opts,
                    &dl_opts,
                    &download_token,
                )
                .await
            {
                Ok((paired_result, paired_node)) => {
                    result = Some(paired_result);
                    selected = Some(paired_node);
                    paired_done = true;
                }
                Err(e) => {
                    info!(error = %e, "paired discovery failed, falling back to full-only discovery");
                }
            }
        }

        if !paired_done {
            if mode == DownloadMode::Full {
                let mut opts = base_opts.clone();
                opts.min_suitable = self.config.snapshots.discovery.candidates.min_suitable_full;
                candidates = discovery::discover_nodes(
                    &cluster_nodes,
                    current_slot,
                    SnapshotKind::Full,
                    &opts,
                    &download_token,
                )
                .await;
            }

            if candidates.is_empty() {
                return self
                    .run_failure_hooks(role, anyhow!("no suitable snapshot nodes found"))
                    .await;
            }

            let total = candidates.len();
            for (index, candidate) in candidates.iter().enumerate() {
                info!(
                    rpc_url = %candidate.rpc_url,
                    slot = candidate.slot,
                    latency = ?candidate.latency,
                    "attempting candidate {} of {}", index + 1, total,
                );

                match downloader::download(
                    &candidate.snapshot_url,
                    self.snapshot_dir(),
                    &candidate.filename,
                    &dl_opts,
                    &download_token,
                )
                .await
                {
                    Ok(download_result) => {
                        result = Some(download_result);
                        selected = Some(candidate.clone());
                        break;
                    }
                    Err(e) => {
                        warn!(node = %candidate.rpc_url, error = %e, "candidate failed");
                    }
                }
            }

            if result.is_none() {
                return self
                    .run_failure_hooks(role, anyhow!("all {} candidates failed", total))
                    .await;
            }
        }

        let result = result.expect("download result set on all success paths");
        let selected = selected.expect("selected node set on all success paths");

        info!(
            file = %result.file_path.display(),
            "{} snapshot downloaded successfully", mode,
        );

        // A plain full leaves us without a delta to the tip; grab a matching
        // incremental opportunistically.
        if mode == DownloadMode::Full && !paired_done {
            let mut opts = base_opts.clone();
            opts.min_suitable = self.config.snapshots.discovery.candidates.min_suitable_incremental;
            self.try_download_incremental(
                &cluster_nodes,
                current_slot,
                selected.slot,
                &opts,
                &dl_opts,
                &download_token,
            )
            .await;
        }

        self.log_remaining_lag(current_slot);

        if let Err(e) = pruner::prune(self.snapshot_dir()) {
            error!(error = %e, "pruning failed");
        }

        let hook_data = TemplateData {
            snapshot_slot: selected.slot.to_string(),
            snapshot_type: mode.to_string(),
            source_node: selected.rpc_url.clone(),
            download_time_sec: result.duration_seconds as u64,
            download_size_mb: result.bytes / (1024 * 1024),
            snapshot_path: result.file_path.display().to_string(),
            cluster_name: self.config.cluster.name.clone(),
            validator_role: role.as_str().to_string(),
            error: String::new(),
        };
        if let Err(e) = hooks::run_hooks(&self.config.hooks.on_success, &hook_data).await {
            error!(error = %e, "success hooks failed");
        }

        Ok(())
    }

    /// Which role the local validator currently holds. An unreachable local
    /// RPC downgrades to Unknown: a validator that is down is certainly not
    /// voting, so downloading is safe.
    async fn check_role(&self) -> ValidatorRole {
        match self.local_rpc.get_identity().await {
            Ok(identity) if identity == self.config.validator.active_identity_pubkey => {
                ValidatorRole::Active
            }
            Ok(_) => ValidatorRole::Passive,
            Err(e) => {
                warn!(error = %e, "local RPC unreachable, assuming validator is down");
                ValidatorRole::Unknown
            }
        }
    }

    /// Decide what, if anything, to download given the cluster tip.
    /// Returns the mode and, for incremental mode, the local full's slot.
    pub fn assess_freshness(&self, current_slot: u64) -> (DownloadMode, u64) {
        let snapshots = match inventory::list_snapshots(self.snapshot_dir()) {
            Ok(snapshots) => snapshots,
            // If we cannot read the directory, just do a full download.
            Err(_) => return (DownloadMode::Full, 0),
        };

        if snapshots.is_empty() {
            info!("no local snapshots found");
            return (DownloadMode::Full, 0);
        }

        let newest_slot = inventory::newest_slot(&snapshots);
        if newest_slot >= current_slot {
            info!(
                local = newest_slot,
                current = current_slot,
                "local snapshot is at or ahead of current slot"
            );
            return (DownloadMode::Skip, 0);
        }

        let age = current_slot - newest_slot;
        let skip_threshold = self.config.snapshots.age.local.max_incremental_slots;
        info!(
            "local snapshot behind network by {} slots ({}), target is {} slots ({})",
            age,
            slots_to_time(age),
            skip_threshold,
            slots_to_time(skip_threshold),
        );

        if age <= skip_threshold {
            return (DownloadMode::Skip, 0);
        }

        if let Some(newest_full) = inventory::newest_full(&snapshots) {
            let full_age = current_slot.saturating_sub(newest_full.slot);
            info!(
                "local full snapshot behind network by {} slots ({}) - attempting incremental download",
                full_age,
                slots_to_time(full_age),
            );
            return (DownloadMode::Incremental, newest_full.slot);
        }

        (DownloadMode::Full, 0)
    }

    fn spawn_identity_monitor(&self, token: CancellationToken) {
        let local_rpc = self.local_rpc.clone();
        let active_pubkey = self.config.validator.active_identity_pubkey.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(constants::timing::IDENTITY_POLL_INTERVAL);
            ticker.tick().await; // the first tick is immediate; the role was just checked
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        // RPC might be temporarily unavailable; keep watching.
                        let Ok(identity) = local_rpc.get_identity().await else {
                            continue;
                        };
                        if identity == active_pubkey {
                            warn!("validator became active during download, aborting");
                            token.cancel();
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn try_paired_full_download(
        &self,
        cluster_nodes: &[ClusterNode],
        current_slot: u64,
        local_full_slot: u64,
        base_opts: &DiscoveryOptions,
        dl_opts: &DownloadOptions,
        token: &CancellationToken,
    ) -> Result<(DownloadResult, SnapshotNode)> {
        let mut opts = base_opts.clone();
        opts.min_suitable = self.config.snapshots.discovery.candidates.min_suitable_full;

        let paired =
            discovery::discover_paired_nodes(cluster_nodes, current_slot, &opts, token).await;
        if paired.is_empty() {
            return Err(anyhow!("no paired snapshot nodes found"));
        }

        let total = paired.len();
        for (index, candidate) in paired.iter().enumerate() {
            // A remote full at or below our local slot gains nothing.
            if local_full_slot > 0 && candidate.full.slot <= local_full_slot {
                info!(
                    local_slot = local_full_slot,
                    remote_slot = candidate.full.slot,
                    "skipping paired candidate {} of {} - local full is newer or equal",
                    index + 1,
                    total,
                );
                continue;
            }

            info!(
                rpc_url = %candidate.full.rpc_url,
                full_slot = candidate.full.slot,
                incremental_slot = candidate.incremental.slot,
                latency = ?candidate.full.latency,
                "trying paired candidate {} of {}", index + 1, total,
            );

            let full_result = match downloader::download(
                &candidate.full.snapshot_url,
                self.snapshot_dir(),
                &candidate.full.filename,
                dl_opts,
                token,
            )
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "paired candidate {} of {} full download failed", index + 1, total);
                    continue;
                }
            };

            info!(
                slot = candidate.full.slot,
                size = %format_size(full_result.bytes),
                "paired candidate {} of {} full snapshot downloaded", index + 1, total,
            );

            self.download_paired_incremental(candidate, index + 1, total, dl_opts, token)
                .await;

            return Ok((full_result, candidate.full.clone()));
        }

        Err(anyhow!("all {} paired candidates failed", total))
    }

    /// The incremental half of a paired download. Failure is non-fatal: the
    /// full snapshot alone is usable.
    async fn download_paired_incremental(
        &self,
        candidate: &PairedSnapshotNode,
        index: usize,
        total: usize,
        dl_opts: &DownloadOptions,
        token: &CancellationToken,
    ) {
        match downloader::download(
            &candidate.incremental.snapshot_url,
            self.snapshot_dir(),
            &candidate.incremental.filename,
            dl_opts,
            token,
        )
        .await
        {
            Ok(_) => {
                info!(
                    slot = candidate.incremental.slot,
                    base_slot = candidate.incremental.base_slot,
                    "paired candidate {} of {} incremental snapshot downloaded", index, total,
                );
            }
            Err(e) => {
                warn!(
                    rpc_url = %candidate.incremental.rpc_url,
                    error = %e,
                    "paired candidate {} of {} incremental download failed, full snapshot still usable",
                    index, total,
                );
            }
        }
    }

    async fn try_download_incremental(
        &self,
        cluster_nodes: &[ClusterNode],
        current_slot: u64,
        base_slot: u64,
        opts: &DiscoveryOptions,
        dl_opts: &DownloadOptions,
        token: &CancellationToken,
    ) {
        info!(base_slot, "looking for incremental snapshot");

        let candidates = discovery::discover_incremental_for_base(
            cluster_nodes,
            current_slot,
            base_slot,
            opts,
            token,
        )
        .await;
        if candidates.is_empty() {
            info!("no matching incremental snapshots available");
            return;
        }

        let attempts = candidates
            .len()
            .min(constants::download::MAX_INCREMENTAL_FOLLOWUP_CANDIDATES);
        for candidate in &candidates[..attempts] {
            match downloader::download(
                &candidate.snapshot_url,
                self.snapshot_dir(),
                &candidate.filename,
                dl_opts,
                token,
            )
            .await
            {
                Ok(_) => {
                    info!(
                        slot = candidate.slot,
                        base_slot = candidate.base_slot,
                        "incremental snapshot downloaded"
                    );
                    return;
                }
                Err(e) => {
                    warn!(node = %candidate.rpc_url, error = %e, "incremental download failed");
                }
            }
        }

        info!("could not download incremental snapshot, full snapshot is still available");
    }

    /// After all downloads, report how far the newest local snapshot still
    /// trails the cluster tip.
    fn log_remaining_lag(&self, current_slot: u64) {
        let Ok(snapshots) = inventory::list_snapshots(self.snapshot_dir()) else {
            return;
        };
        if snapshots.is_empty() {
            return;
        }
        let newest_slot = inventory::newest_slot(&snapshots);
        if current_slot > newest_slot {
            let behind = current_slot - newest_slot;
            let target = self.config.snapshots.age.local.max_incremental_slots;
            info!(
                "latest snapshot behind network by {} slots ({}), target is {} slots ({})",
                behind,
                slots_to_time(behind),
                target,
                slots_to_time(target),
            );
        }
    }

    async fn run_failure_hooks(&self, role: ValidatorRole, original: anyhow::Error) -> Result<()> {
        error!(error = %original, "snapshot cycle failed");

        let hook_data = TemplateData {
            cluster_name: self.config.cluster.name.clone(),
            validator_role: role.as_str().to_string(),
            error: original.to_string(),
            ..Default::default()
        };
        if let Err(e) = hooks::run_hooks(&self.config.hooks.on_failure, &hook_data).await {
            error!(error = %e, "failure hooks failed");
        }

        Err(original)
    }
}
