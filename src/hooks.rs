//! User hook execution
//!
//! Hooks are shell commands run after a cycle, with snapshot details
//! substituted into the command, its arguments, and its environment via
//! `{{.Variable}}` placeholders.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::HookCommand;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.?([A-Za-z]+)\s*\}\}").unwrap());

/// Values available to hook templates. `error` is only populated for
/// on_failure hooks.
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    pub snapshot_slot: String,
    pub snapshot_type: String,
    pub source_node: String,
    pub download_time_sec: u64,
    pub download_size_mb: u64,
    pub snapshot_path: String,
    pub cluster_name: String,
    pub validator_role: String,
    pub error: String,
}

impl TemplateData {
    fn lookup(&self, name: &str) -> String {
        match name {
            "SnapshotSlot" => self.snapshot_slot.clone(),
            "SnapshotType" => self.snapshot_type.clone(),
            "SourceNode" => self.source_node.clone(),
            "DownloadTimeSec" => self.download_time_sec.to_string(),
            "DownloadSizeMB" => self.download_size_mb.to_string(),
            "SnapshotPath" => self.snapshot_path.clone(),
            "ClusterName" => self.cluster_name.clone(),
            "ValidatorRole" => self.validator_role.clone(),
            "Error" => self.error.clone(),
            _ => String::new(),
        }
    }
}

/// Substitute `{{.Variable}}` placeholders; unknown variables render empty.
fn render(template: &str, data: &TemplateData) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| data.lookup(&caps[1]))
        .into_owned()
}

/// Run a list of hooks in order. A failing hook aborts the rest unless it is
/// marked `allow_failure`.
pub async fn run_hooks(hooks: &[HookCommand], data: &TemplateData) -> Result<()> {
    for (index, hook) in hooks.iter().enumerate() {
        if hook.disabled {
            debug!(name = %hook.name, "hook disabled, skipping");
            continue;
        }

        info!(name = %hook.name, index, "running hook");

        if let Err(e) = run_hook(hook, data).await {
            if hook.allow_failure {
                warn!(name = %hook.name, error = %e, "hook failed (allow_failure=true)");
                continue;
            }
            return Err(anyhow!("hook {:?} failed: {}", hook.name, e));
        }

        info!(name = %hook.name, "hook completed");
    }
    Ok(())
}

async fn run_hook(hook: &HookCommand, data: &TemplateData) -> Result<()> {
    let cmd = render(&hook.cmd, data);

    let mut command = Command::new(&cmd);
    for arg in &hook.args {
        command.arg(render(arg, data));
    }
    for (key, value) in &hook.environment {
        command.env(key, render(value, data));
    }

    if hook.stream_output {
        return run_streamed(command, &hook.name).await;
    }

    let output = command
        .output()
        .await
        .map_err(|e| anyhow!("spawning {:?}: {}", cmd, e))?;

    let combined = String::from_utf8_lossy(&output.stdout).to_string()
        + &String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        error!(name = %hook.name, output = %combined.trim(), "hook output");
        return Err(anyhow!("exited with {}", output.status));
    }
    if !combined.trim().is_empty() {
        debug!(name = %hook.name, output = %combined.trim(), "hook output");
    }
    Ok(())
}

/// Run a hook forwarding its stdout and stderr into the log line by line.
async fn run_streamed(mut command: Command, name: &str) -> Result<()> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| anyhow!("spawning hook: {}", e))?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let stdout_name = name.to_string();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(hook = %stdout_name, "{}", line);
        }
    });

    let stderr_name = name.to_string();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            error!(hook = %stderr_name, "{}", line);
        }
    });

    let status = child.wait().await?;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if !status.success() {
        return Err(anyhow!("exited with {}", status));
    }
    Ok(())
}
