//! Run loop
//!
//! One-shot or interval-aligned invocation of the keeper, guarded by the
//! single-instance lock. Interval runs align to wall-clock boundaries from
//! local midnight, so "every 10 minutes" fires at :00, :10, :20 and so on.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::keeper::Keeper;
use crate::lock::InstanceLock;

pub struct Runner {
    config: Arc<Config>,
    keeper: Keeper,
}

impl Runner {
    pub fn new(config: Arc<Config>) -> Self {
        let keeper = Keeper::new(config.clone());
        Self { config, keeper }
    }

    fn lock(&self) -> InstanceLock {
        InstanceLock::new(Path::new(&self.config.snapshots.directory))
    }

    /// Run a single cycle under the instance lock.
    pub async fn run_once(&self) -> Result<()> {
        info!("running snapshot keeper (once)");

        let lock = self.lock();
        lock.acquire()?;

        let result = self.keeper.run(&CancellationToken::new()).await;
        lock.release();
        result
    }

    /// Run forever, one cycle per interval boundary. A cycle that cannot take
    /// the lock is skipped, not queued.
    pub async fn run_on_interval(&self, interval: Duration) -> Result<()> {
        info!(interval = %humantime::format_duration(interval), "running snapshot keeper on interval");

        loop {
            let now = Local::now();
            let next = next_boundary(now, interval);
            let sleep_for = (next - now).to_std().unwrap_or_default();
            info!(
                "next run in {} at {}",
                humantime::format_duration(Duration::from_secs(sleep_for.as_secs())),
                next.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            );

            tokio::time::sleep(sleep_for).await;

            let lock = self.lock();
            if let Err(e) = lock.acquire() {
                warn!(error = %e, "skipping cycle, lock held by another process");
                continue;
            }

            if let Err(e) = self.keeper.run(&CancellationToken::new()).await {
                error!(error = %e, "run failed");
            }

            lock.release();
        }
    }
}

/// The next wall-clock instant aligned to `interval` counted from local
/// midnight, strictly after `now`.
fn next_boundary(now: DateTime<Local>, interval: Duration) -> DateTime<Local> {
    let interval = match ChronoDuration::from_std(interval) {
        Ok(d) if d > ChronoDuration::zero() => d,
        _ => return now,
    };

    let midnight_naive = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let midnight = Local
        .from_local_datetime(&midnight_naive)
        .earliest()
        .unwrap_or(now);

    let elapsed_ms = (now - midnight).num_milliseconds().max(0);
    let interval_ms = interval.num_milliseconds().max(1);
    let intervals = elapsed_ms / interval_ms;

    let mut next = midnight + interval * (intervals as i32 + 1);
    if next <= now {
        next = next + interval;
    }
    next
}
