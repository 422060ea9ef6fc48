// src/config.rs
// =============================================================================
// Run configuration, built once from the command line.
//
// The CLI layer validates user input (CDN name, durations, address range)
// and turns it into plain structs. The engine never sees raw arguments and
// never looks up a CDN name itself; it gets a hostname handed to it.
// =============================================================================

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Where the crawl starts when no checkpoint exists.
pub const DEFAULT_START: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 0);

/// Exclusive upper bound of the crawl. 255.0.0.0/8 and above is reserved
/// space with no end users to map, so the crawl stops there by default.
pub const DEFAULT_END: Ipv4Addr = Ipv4Addr::new(255, 0, 0, 0);

/// Public resolvers known to forward the client-subnet option.
pub const DEFAULT_RESOLVERS: [SocketAddr; 2] = [
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53),
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)), 53),
];

/// Probes between checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 500;

pub const DEFAULT_STATE_FILE: &str = "mapping.json";
pub const DEFAULT_GEOIP_DB: &str = "geoip/GeoLite2-City.mmdb";

/// CDNs whose authoritative servers honour EDNS client-subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CdnTarget {
    Google,
    Edgecast,
    Cloudfront,
    #[value(name = "maxcdn")]
    MaxCdn,
}

impl CdnTarget {
    /// The hostname whose answers reveal this CDN's front-ends.
    pub fn hostname(self) -> &'static str {
        match self {
            CdnTarget::Google => "www.google.com",
            CdnTarget::Edgecast => "gp1.wac.v2cdn.net",
            CdnTarget::Cloudfront => "dl47xs20witg8.cloudfront.net",
            CdnTarget::MaxCdn => "gp1.wac.v2cdn.net",
        }
    }
}

/// Everything the crawl needs, already validated.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub hostname: String,
    pub resolvers: Vec<SocketAddr>,
    /// Pause after a normal probe (and after a timeout).
    pub delay: Duration,
    /// Pause after an empty answer, which usually means we are throttled.
    pub cooldown: Duration,
    pub timeout: Duration,
    pub start: Ipv4Addr,
    /// Exclusive end of the crawl, as a u64 so 2^32 is expressible.
    pub end: u64,
    pub checkpoint_every: u64,
    pub state_path: PathBuf,
    /// Optional GeoIP database; addresses it cannot place are skipped.
    pub geoip: Option<PathBuf>,
}

impl CrawlConfig {
    /// Defaults for `target`, matching the CLI defaults.
    pub fn for_target(target: CdnTarget) -> Self {
        Self {
            hostname: target.hostname().to_string(),
            resolvers: DEFAULT_RESOLVERS.to_vec(),
            delay: Duration::from_millis(100),
            cooldown: Duration::from_secs(90),
            timeout: Duration::from_millis(500),
            start: DEFAULT_START,
            end: u64::from(u32::from(DEFAULT_END)),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            geoip: None,
        }
    }

    // Checks the cross-field rules clap cannot express on its own.
    pub fn validate(&self) -> Result<()> {
        if self.resolvers.is_empty() {
            bail!("at least one resolver is required");
        }
        if self.checkpoint_every == 0 {
            bail!("checkpoint interval must be at least 1 probe");
        }
        if u64::from(u32::from(self.start)) >= self.end {
            bail!(
                "start address {} is not below the end of the crawl ({})",
                self.start,
                end_display(self.end)
            );
        }
        Ok(())
    }
}

/// Settings for the `locate` pass.
#[derive(Debug, Clone)]
pub struct LocateConfig {
    pub state_path: PathBuf,
    pub geoip: PathBuf,
    pub json: bool,
}

/// Parses a non-negative number of seconds, as given on the command line.
pub fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{what} must be a non-negative number of seconds, got {value}"))
}

fn end_display(end: u64) -> String {
    match u32::try_from(end) {
        Ok(addr) => Ipv4Addr::from(addr).to_string(),
        Err(_) => "end of IPv4 space".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_target_has_hostname() {
        for target in CdnTarget::value_variants() {
            assert!(!target.hostname().is_empty());
        }
        assert_eq!(CdnTarget::Google.hostname(), "www.google.com");
        assert_eq!(CdnTarget::Cloudfront.hostname(), "dl47xs20witg8.cloudfront.net");
    }

    #[test]
    fn test_target_names_on_command_line() {
        assert_eq!(CdnTarget::from_str("maxcdn", true), Ok(CdnTarget::MaxCdn));
        assert_eq!(CdnTarget::from_str("edgecast", true), Ok(CdnTarget::Edgecast));
        assert!(CdnTarget::from_str("akamai", true).is_err());
    }

    #[test]
    fn test_defaults_validate() {
        CrawlConfig::for_target(CdnTarget::Google).validate().unwrap();
    }

    #[test]
    fn test_start_past_end_rejected() {
        let mut config = CrawlConfig::for_target(CdnTarget::Google);
        config.start = Ipv4Addr::new(255, 1, 0, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(0.5, "timeout").unwrap(), Duration::from_millis(500));
        assert_eq!(seconds(90.0, "cooldown").unwrap(), Duration::from_secs(90));
        assert!(seconds(-1.0, "delay").is_err());
        assert!(seconds(f64::NAN, "delay").is_err());
    }
}
