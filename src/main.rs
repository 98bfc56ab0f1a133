use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use zonescraper::{
    config::Config,
    coverage::SpreadsheetExtractor,
    fetch::HttpFetcher,
    ranges,
    reconcile::{Limits, Reconciler},
    strategy::{self, Strategy, StrategyKind},
};

#[derive(Parser)]
#[command(name = "zonescraper", about = "Download UPS zone files and fill coverage gaps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the zone file for every range and fill coverage gaps.
    Run {
        /// Config file (defaults to ./zonescraper.toml when present).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides `run.strategy` from the config.
        #[arg(long, value_enum)]
        strategy: Option<StrategyKind>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,zonescraper=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let Command::Run {
        config,
        strategy: strategy_override,
    } = Cli::parse().command;
    info!("startup");

    // ─── 2) config ───────────────────────────────────────────────────
    let cfg = Config::load(config.as_deref())?;
    let kind = strategy_override.unwrap_or(cfg.run.strategy);

    // ─── 3) expected ranges ──────────────────────────────────────────
    let ranges = ranges::load(
        &cfg.ranges.path,
        &cfg.ranges.column_from,
        &cfg.ranges.column_to,
        &cfg.ranges.sheet,
    )
    .with_context(|| format!("loading ranges from {:?}", cfg.ranges.path))?;
    if ranges.is_empty() {
        info!("no ranges; exit");
        return Ok(());
    }

    // ─── 4) fetch + reconcile ────────────────────────────────────────
    let fetcher = HttpFetcher::from_config(&cfg)?;
    info!(dir = %fetcher.output_dir().display(), strategy = ?kind, "downloading zone files");
    let extractor = SpreadsheetExtractor;
    let limits = Limits {
        max_fetches_per_entry: cfg.run.max_fetches_per_entry,
        deadline: cfg
            .run
            .deadline()
            .map(|d| tokio::time::Instant::now() + d),
    };
    let reconciler = Reconciler::new(&fetcher, &extractor, limits);
    let summary = strategy::run(
        Strategy::new(kind, cfg.run.max_in_flight),
        &ranges,
        &reconciler,
    )
    .await;

    // ─── 5) report ───────────────────────────────────────────────────
    summary.log();
    if !summary.is_success() {
        bail!(
            "{} of {} ranges failed",
            summary.failed(),
            summary.entries.len()
        );
    }
    info!("all done");
    Ok(())
}
