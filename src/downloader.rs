//! Snapshot downloading
//!
//! Uses parallel segmented downloads when the server supports Range requests
//! and a single stream otherwise. Every download doubles as a speed test:
//! when average throughput during the opening window is below the configured
//! floor, the transfer is aborted so the caller can try the next candidate.

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::format_size;
use crate::constants;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Minimum average throughput in bytes per second; 0 disables the gate.
    pub min_speed_bytes: u64,
    /// How long to let the transfer warm up before the one-shot speed check.
    pub min_speed_check_delay: Duration,
    pub connections: usize,
    /// Wall-clock ceiling for the whole download.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub file_path: PathBuf,
    pub bytes: u64,
    pub duration_seconds: f64,
    pub speed_bps: u64,
}

/// Shared teardown state for one download: the first error wins, and
/// recording it cancels every sibling task.
struct FirstError {
    slot: Mutex<Option<anyhow::Error>>,
    token: CancellationToken,
}

impl FirstError {
    fn new(token: CancellationToken) -> Self {
        Self {
            slot: Mutex::new(None),
            token,
        }
    }

    fn record(&self, error: anyhow::Error) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.token.cancel();
    }

    fn take(&self) -> Option<anyhow::Error> {
        self.slot.lock().unwrap().take()
    }
}

/// Download a snapshot into `dest_dir/filename`, writing through a `.tmp`
/// file that is renamed into place only on success and removed on any other
/// exit. Cancelling `cancel` aborts the transfer promptly.
pub async fn download(
    url: &str,
    dest_dir: &Path,
    filename: &str,
    opts: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<DownloadResult> {
    let dest_path = dest_dir.join(filename);
    let temp_path = dest_dir.join(format!("{}.tmp", filename));

    let client = Client::new();

    let head = client
        .head(url)
        .send()
        .await
        .map_err(|e| anyhow!("HEAD request: {}", e))?;
    let content_length: u64 = head
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let supports_range = head
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "bytes")
        .unwrap_or(false)
        && content_length > 0;

    let parallel = supports_range && opts.connections > 1;
    info!(
        url,
        size = %format_size(content_length),
        parallel,
        connections = opts.connections,
        "downloading snapshot"
    );

    let start = Instant::now();
    let token = cancel.child_token();

    let transfer = async {
        if parallel {
            download_parallel(&client, url, &temp_path, content_length, opts, &token).await
        } else {
            download_single(&client, url, &temp_path, content_length, opts, &token).await
        }
    };

    let outcome = tokio::select! {
        outcome = tokio::time::timeout(opts.timeout, transfer) => match outcome {
            Ok(inner) => inner,
            Err(_) => Err(anyhow!("download timed out after {:?}", opts.timeout)),
        },
        _ = cancel.cancelled() => Err(anyhow!("download cancelled")),
    };
    token.cancel();

    let total_bytes = match outcome {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&temp_path, &dest_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(anyhow!("renaming temp file: {}", e));
    }

    let duration = start.elapsed();
    let speed_bps = (total_bytes as f64 / duration.as_secs_f64()) as u64;
    info!(
        url,
        file = filename,
        size = %format_size(total_bytes),
        elapsed = ?duration,
        speed = %format!("{}/s", format_size(speed_bps)),
        "snapshot downloaded"
    );

    Ok(DownloadResult {
        file_path: dest_path,
        bytes: total_bytes,
        duration_seconds: duration.as_secs_f64(),
        speed_bps,
    })
}

/// Split `content_length` into byte ranges that tile `[0, content_length - 1]`
/// exactly; the last chunk absorbs the remainder. Uses fewer than the
/// requested connections when the payload is smaller than one byte per chunk.
fn chunk_ranges(content_length: u64, connections: usize) -> Vec<(u64, u64)> {
    let n = (connections.max(1) as u64).min(content_length.max(1));
    let chunk_size = content_length / n;
    (0..n)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == n - 1 {
                content_length - 1
            } else {
                start + chunk_size - 1
            };
            (start, end)
        })
        .collect()
}

fn spawn_speed_gate(
    opts: &DownloadOptions,
    total: Arc<AtomicU64>,
    first_error: Arc<FirstError>,
    token: CancellationToken,
) {
    if opts.min_speed_check_delay.is_zero() || opts.min_speed_bytes == 0 {
        return;
    }
    let delay = opts.min_speed_check_delay;
    let min_speed = opts.min_speed_bytes;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let downloaded = total.load(Ordering::Relaxed);
                let speed = (downloaded as f64 / delay.as_secs_f64()) as u64;
                if speed < min_speed {
                    first_error.record(anyhow!(
                        "speed {}/s below minimum {}/s",
                        format_size(speed),
                        format_size(min_speed)
                    ));
                } else {
                    info!(speed = %format!("{}/s", format_size(speed)), "speed check passed");
                }
            }
            _ = token.cancelled() => {}
        }
    });
}

fn spawn_progress_bar(content_length: u64, total: Arc<AtomicU64>, token: CancellationToken) {
    let bar = if content_length > 0 {
        let bar = ProgressBar::new(content_length);
        bar.set_style(
            ProgressStyle::with_template(
                "  [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
            )
            .expect("valid progress template")
            .progress_chars("=> "),
        );
        bar
    } else {
        let bar = ProgressBar::no_length();
        bar.set_style(
            ProgressStyle::with_template("  {spinner:.green} {bytes} {bytes_per_sec}")
                .expect("valid progress template"),
        );
        bar
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(constants::timing::PROGRESS_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => bar.set_position(total.load(Ordering::Relaxed)),
                _ = token.cancelled() => {
                    bar.finish_and_clear();
                    return;
                }
            }
        }
    });
}

async fn download_parallel(
    client: &Client,
    url: &str,
    temp_path: &Path,
    content_length: u64,
    opts: &DownloadOptions,
    token: &CancellationToken,
) -> Result<u64> {
    // Pre-allocate the destination so workers can write disjoint ranges.
    let file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| anyhow!("creating temp file: {}", e))?;
    file.set_len(content_length)
        .await
        .map_err(|e| anyhow!("pre-allocating temp file: {}", e))?;
    drop(file);

    let total = Arc::new(AtomicU64::new(0));
    let first_error = Arc::new(FirstError::new(token.clone()));

    spawn_speed_gate(opts, total.clone(), first_error.clone(), token.clone());
    spawn_progress_bar(content_length, total.clone(), token.clone());

    let mut workers = Vec::with_capacity(opts.connections);
    for (index, (range_start, range_end)) in
        chunk_ranges(content_length, opts.connections).into_iter().enumerate()
    {
        let client = client.clone();
        let url = url.to_string();
        let temp_path = temp_path.to_path_buf();
        let total = total.clone();
        let first_error = first_error.clone();
        let token = token.clone();

        workers.push(tokio::spawn(async move {
            if let Err(e) =
                download_chunk(&client, &url, &temp_path, range_start, range_end, &total, &token)
                    .await
            {
                first_error.record(anyhow!("chunk {}: {}", index, e));
            }
        }));
    }

    for worker in workers {
        if let Err(e) = worker.await {
            first_error.record(anyhow!("chunk worker panicked: {}", e));
        }
    }
    token.cancel();

    match first_error.take() {
        Some(e) => Err(e),
        None => Ok(total.load(Ordering::Relaxed)),
    }
}

async fn download_chunk(
    client: &Client,
    url: &str,
    temp_path: &Path,
    range_start: u64,
    range_end: u64,
    total: &AtomicU64,
    token: &CancellationToken,
) -> Result<()> {
    let request = client.get(url).header(
        reqwest::header::RANGE,
        format!("bytes={}-{}", range_start, range_end),
    );
    let mut response = tokio::select! {
        response = request.send() => response?,
        _ = token.cancelled() => return Err(anyhow!("cancelled")),
    };

    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(anyhow!("expected 206, got {}", response.status()));
    }

    // Each worker holds its own handle positioned at its range start, so
    // writes never contend on a shared cursor.
    let mut file = OpenOptions::new().write(true).open(temp_path).await?;
    file.seek(SeekFrom::Start(range_start)).await?;

    loop {
        let chunk = tokio::select! {
            chunk = response.chunk() => chunk?,
            _ = token.cancelled() => return Err(anyhow!("cancelled")),
        };
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk).await?;
        total.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    file.flush().await?;

    Ok(())
}

async fn download_single(
    client: &Client,
    url: &str,
    temp_path: &Path,
    content_length: u64,
    opts: &DownloadOptions,
    token: &CancellationToken,
) -> Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow!("GET request: {}", e))?;

    if response.status() != StatusCode::OK {
        return Err(anyhow!("unexpected status {}", response.status()));
    }

    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| anyhow!("creating temp file: {}", e))?;

    let total = Arc::new(AtomicU64::new(0));
    let first_error = Arc::new(FirstError::new(token.clone()));

    spawn_speed_gate(opts, total.clone(), first_error.clone(), token.clone());
    spawn_progress_bar(content_length, total.clone(), token.clone());

    let stream_result: Result<()> = async {
        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk?,
                _ = token.cancelled() => return Err(anyhow!("cancelled")),
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            total.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    token.cancel();

    // A gate abort surfaces as "cancelled" in the stream; prefer the gate's
    // own error so the caller sees the measured speed.
    match (stream_result, first_error.take()) {
        (_, Some(gate_error)) => Err(gate_error),
        (Err(e), None) => Err(e),
        (Ok(()), None) => Ok(total.load(Ordering::Relaxed)),
    }
}
