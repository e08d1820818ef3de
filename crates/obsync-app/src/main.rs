//! `obsync` binary: replays a recorded feed through the tracker.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Replay a recorded market data feed into synchronized order books")]
struct Args {
    /// TOML config file.
    #[arg(short, long, env = "OBSYNC_CONFIG", default_value = "config/default.toml")]
    config: PathBuf,

    /// Replace `replay.path` from the config file.
    #[arg(long)]
    feed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    obsync_ws::init_crypto();
    obsync_telemetry::init_logging()?;

    let mut config = obsync_app::AppConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(feed) = args.feed {
        config.replay.path = feed;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        feed = %config.replay.path.display(),
        markets = ?config.tracker.markets,
        "obsync starting"
    );

    let summary = obsync_app::Application::new(config)?.run().await?;
    info!(
        books = summary.books.len(),
        diffs = summary.metrics.total_diffs_processed,
        actions = summary.completed_actions,
        "obsync finished"
    );
    Ok(())
}
