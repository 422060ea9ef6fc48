// src/main.rs
// =============================================================================
// This is the entry point of the PoP crawler.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Set up logging (tracing, to stderr)
// 3. Dispatch to the crawl or locate handler
// 4. Exit with proper code (0 = success, 2 = error)
//
// Results (the CSV/JSON report) go to stdout, diagnostics to stderr, so
// `pop-crawler locate > pops.csv` captures only the data.
// =============================================================================

mod cli;
mod config;
mod crawl;
mod geo;
mod locate;
mod net;
mod probe;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{CrawlConfig, LocateConfig};
use crawl::{CrawlEngine, KnownRangeFilter, DEFAULT_MASK};
use geo::MaxMindOracle;
use net::AddressCursor;
use probe::DnsProber;
use std::io::Write;
use store::{CheckpointStore, CrawlState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Crawl(args) => handle_crawl(args.to_config()?).await,
        Commands::Locate(args) => handle_locate(args.to_config()).await,
    }
}

// RUST_LOG wins if set; otherwise info, or warn with --quiet.
fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// Handles the 'crawl' subcommand: resume or start fresh, then scan until
// the end of the range or Ctrl+C.
async fn handle_crawl(config: CrawlConfig) -> Result<i32> {
    let store = CheckpointStore::new(&config.state_path);
    let state = match store.load().await? {
        Some(state) => {
            info!(
                path = %store.path().display(),
                pops = state.registry.len(),
                at = ?state.cursor.address(),
                "resuming from checkpoint"
            );
            state
        }
        None => {
            info!(start = %config.start, "no checkpoint found, starting fresh");
            CrawlState::fresh(AddressCursor::new(config.start, DEFAULT_MASK))
        }
    };

    let prober = DnsProber::new(&config.hostname, config.resolvers.clone(), config.timeout)?;
    let mut engine = CrawlEngine::new(prober, &config, store, state);
    if let Some(path) = &config.geoip {
        engine = engine.with_geo_filter(Box::new(MaxMindOracle::open(path)?));
    }

    info!(hostname = %config.hostname, resolvers = ?config.resolvers, "crawling");
    let shutdown = async {
        // If the signal handler cannot be installed, just crawl to the end.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let stats = engine.run(shutdown).await;

    info!(
        probes = stats.probes,
        skipped = stats.skipped,
        unlocated = stats.unlocated,
        timeouts = stats.timeouts,
        failures = stats.failures,
        "crawl finished"
    );
    // Not fatal, but the user should know the file may lag behind
    if stats.save_failures > 0 {
        warn!(
            save_failures = stats.save_failures,
            path = %config.state_path.display(),
            "some checkpoints could not be written; a resume may repeat work"
        );
    }
    Ok(0)
}

// Handles the 'locate' subcommand: one centroid per PoP, written to stdout.
async fn handle_locate(config: LocateConfig) -> Result<i32> {
    // Open the database first: without it there is nothing to compute.
    let oracle = MaxMindOracle::open(&config.geoip)?;

    let store = CheckpointStore::new(&config.state_path);
    let state = store
        .load()
        .await?
        .with_context(|| format!("no crawl results at {}", config.state_path.display()))?;
    if state.registry.is_empty() {
        warn!(path = %config.state_path.display(), "checkpoint holds no PoPs yet");
    }

    let centroids = locate::estimate_all(&state.registry, &KnownRangeFilter::google(), &oracle);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = if config.json {
        locate::write_json(&mut out, &centroids)?
    } else {
        locate::write_csv(&mut out, &centroids)?
    };
    out.flush()?;

    info!(
        pops = state.registry.len(),
        rows = summary.rows,
        skipped = summary.skipped,
        "locate finished"
    );
    Ok(0)
}
