use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use snapshot_keeper::config::Config;
use snapshot_keeper::runner::Runner;

#[derive(Parser, Debug)]
#[command(
    name = "snapshot-keeper",
    version,
    about = "Keeps fresh Solana snapshots on disk"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the snapshot keeper (once or on an interval)
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the config file
    #[arg(short, long, default_value_t = default_config_path())]
    config: String,

    /// Run on an interval (e.g. 4h, 30m)
    #[arg(short = 'i', long)]
    on_interval: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Disable timestamps in log output (overrides log.disable_timestamps)
    #[arg(long)]
    log_disable_timestamps: bool,
}

fn default_config_path() -> String {
    match std::env::var("HOME") {
        Ok(home) => format!("{}/solana-validator-snapshot-keeper/config.toml", home),
        Err(_) => "config.toml".to_string(),
    }
}

fn init_logging(config: &Config, args: &RunArgs) -> Result<()> {
    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    let disable_timestamps = config.log.disable_timestamps || args.log_disable_timestamps;

    let builder = fmt().with_env_filter(env_filter);
    match (config.log.format.as_str(), disable_timestamps) {
        ("json", true) => builder.json().without_time().init(),
        ("json", false) => builder.json().init(),
        (_, true) => builder.without_time().init(),
        (_, false) => builder.init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    init_logging(&config, &args)?;

    info!(config = %args.config, "starting snapshot keeper");

    let runner = Runner::new(Arc::new(config));

    if let Some(interval_str) = &args.on_interval {
        let interval = humantime::parse_duration(interval_str)
            .map_err(|e| anyhow!("invalid interval {:?}: {}", interval_str, e))?;
        runner.run_on_interval(interval).await
    } else {
        runner.run_once().await
    }
}
