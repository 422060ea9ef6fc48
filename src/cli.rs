// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands:
// - crawl: probe the address space and build up the PoP mapping
// - locate: turn a finished mapping into one location per PoP
//
// Everything here is raw user input. config.rs turns it into validated
// settings before anything else sees it.
// =============================================================================

use crate::config::{
    seconds, CdnTarget, CrawlConfig, LocateConfig, DEFAULT_CHECKPOINT_EVERY, DEFAULT_END,
    DEFAULT_GEOIP_DB, DEFAULT_START, DEFAULT_STATE_FILE,
};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pop-crawler",
    version = "0.1.0",
    about = "Point of Presence crawler: maps a CDN's front-end clusters with EDNS client-subnet probes",
    long_about = "pop-crawler asks public resolvers which front-ends a CDN would hand to clients all over \
                  the IPv4 space, records the answers, and estimates where each cluster is."
)]
pub struct Cli {
    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl the address space and record which PoP answers each block
    ///
    /// Example: pop-crawler crawl --name google --delay 0.2
    Crawl(CrawlArgs),

    /// Estimate a location for every PoP in a finished crawl
    ///
    /// Example: pop-crawler locate --geoip geoip/GeoLite2-City.mmdb > pops.csv
    Locate(LocateArgs),
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// The CDN to crawl
    #[arg(short, long, value_enum, default_value_t = CdnTarget::Google)]
    pub name: CdnTarget,

    /// Seconds to sleep between normal DNS queries
    #[arg(short, long, default_value_t = 0.1)]
    pub delay: f64,

    /// Seconds to sleep when a resolver refuses to answer
    #[arg(short, long, default_value_t = 90.0)]
    pub cooldown: f64,

    /// Seconds to wait for a DNS response
    #[arg(short, long, default_value_t = 0.5)]
    pub timeout: f64,

    /// Address to start from when no checkpoint exists
    #[arg(short, long, default_value_t = DEFAULT_START)]
    pub start: Ipv4Addr,

    /// Stop before this address
    #[arg(long, default_value_t = DEFAULT_END)]
    pub end: Ipv4Addr,

    /// Checkpoint file (created if missing, resumed if present)
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    pub state: PathBuf,

    /// Resolver to query, may be repeated (default: 8.8.8.8:53 and 8.8.4.4:53)
    #[arg(long = "resolver")]
    pub resolvers: Vec<SocketAddr>,

    /// Probes between checkpoints
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_every: u64,

    /// GeoLite2-City database; addresses it cannot place are not probed
    #[arg(long)]
    pub geoip: Option<PathBuf>,
}

impl CrawlArgs {
    // Resolves the CDN name and converts durations. The CDN table lookup
    // happens here, once; the engine only ever sees the hostname.
    pub fn to_config(&self) -> Result<CrawlConfig> {
        // Start from the target's defaults, then apply what the user typed
        let mut config = CrawlConfig::for_target(self.name);

        // An empty --resolver list keeps the default pool
        if !self.resolvers.is_empty() {
            config.resolvers = self.resolvers.clone();
        }

        config.delay = seconds(self.delay, "delay")?;
        config.cooldown = seconds(self.cooldown, "cooldown")?;
        config.timeout = seconds(self.timeout, "timeout")?;
        config.start = self.start;
        config.end = u64::from(u32::from(self.end));
        config.checkpoint_every = self.checkpoint_every;
        config.state_path = self.state.clone();
        config.geoip = self.geoip.clone();

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct LocateArgs {
    /// Checkpoint file written by `crawl`
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    pub state: PathBuf,

    /// GeoLite2-City database
    #[arg(long, default_value = DEFAULT_GEOIP_DB)]
    pub geoip: PathBuf,

    /// Output results in JSON format instead of CSV
    #[arg(long)]
    pub json: bool,
}

impl LocateArgs {
    pub fn to_config(&self) -> LocateConfig {
        LocateConfig {
            state_path: self.state.clone(),
            geoip: self.geoip.clone(),
            json: self.json,
        }
    }
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why a ValueEnum for the CDN name?
//    - clap rejects unknown names before our code runs
//    - `--help` lists the valid choices automatically
//
// 2. Why f64 seconds on the command line but Duration inside?
//    - "0.1" is what people type; Duration is what timers take
//    - seconds() rejects negative and NaN values with a readable error
//
// 3. Why is --resolver a Vec?
//    - Repeating a flag (`--resolver 1.1.1.1:53 --resolver 9.9.9.9:53`)
//      collects every value; an empty Vec means "use the defaults"
// -----------------------------------------------------------------------------
