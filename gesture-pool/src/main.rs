//! gesture-pool - replay gesture scripts through a per-body recognizer pool.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gesture_pool::catalog::GestureCatalog;
use gesture_pool::config::Config;
use gesture_pool::replay;

#[derive(Parser, Debug)]
#[command(name = "gesture-pool", about = "Per-body discrete gesture recognizer pool")]
struct Cli {
    /// Config file (s-expression plist)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gesture definition source; repeatable, replaces configured sources
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Replay script to play against the pool
    #[arg(long)]
    script: Option<PathBuf>,

    /// Script steps per second (0 = as fast as possible)
    #[arg(long)]
    frame_rate: Option<u32>,

    /// Log pool status every N steps
    #[arg(long)]
    status_every: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gesture-pool {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gesture_pool=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if !cli.sources.is_empty() {
        config.catalog.sources = cli.sources.clone();
    }
    if let Some(rate) = cli.frame_rate {
        config.replay.frame_rate_hz = rate;
    }
    if let Some(every) = cli.status_every {
        config.replay.status_every = every;
    }

    if cli.print_config {
        println!("{}", config.config_sexp());
        return Ok(());
    }

    info!("gesture-pool v{} starting", env!("CARGO_PKG_VERSION"));

    if config.catalog.sources.is_empty() {
        anyhow::bail!("no gesture definition sources configured (use --source or :sources)");
    }
    let catalog = GestureCatalog::load_files(
        &config.catalog.sources,
        config.catalog.min_display_width,
        &config.catalog.placeholder_name,
    )
    .context("loading gesture catalog")?;

    let steps = match &cli.script {
        Some(path) => replay::load_script(path)?,
        None => {
            info!("no replay script given, reporting initial state");
            Vec::new()
        }
    };

    // Signal handling via libc
    replay::install_signal_handlers();

    let summary = replay::run(catalog, &config.replay, steps)?;
    for view in &summary.views {
        println!("{}", view.status_sexp());
    }
    if summary.interrupted {
        info!(steps = summary.steps, "replay interrupted");
    }
    Ok(())
}
