// src/crawl/engine.rs
// =============================================================================
// The scan loop.
//
// One iteration makes exactly one decision about the block under the
// cursor:
//
//   known range     -> jump over the whole range, no probe, no sleep
//   not geolocated  -> step over it with the current mask (only with --geoip)
//   probe timed out -> count it, step with the current mask
//   empty answer    -> count it, step with the default mask, cool down
//   answers         -> record them, step with the mask the scope suggests
//
// Every `checkpoint_every` probes the registry and cursor are saved before
// the loop continues. The save is awaited inline: nothing is mutated while
// it runs, so the checkpoint always matches the in-memory state exactly.
//
// Nothing in here stops the crawl except the end of the range or shutdown.
// A failed save is logged and counted; the old checkpoint stays in place
// (the store only ever renames a complete file over it) and the next
// boundary tries again.
//
// Probing is strictly sequential: one query in flight at a time.
// =============================================================================

use super::known_ranges::KnownRangeFilter;
use super::step::{next_mask, DEFAULT_MASK};
use crate::config::CrawlConfig;
use crate::geo::GeoOracle;
use crate::probe::{ProbeResult, Prober};
use crate::store::{CheckpointStore, CrawlState, Observation};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Running totals for one crawl session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Queries sent (including ones that timed out).
    pub probes: u64,
    /// Blocks jumped over because they are in a known range.
    pub skipped: u64,
    /// Blocks stepped over because the GeoIP filter could not place them.
    pub unlocated: u64,
    pub timeouts: u64,
    pub failures: u64,
    /// Checkpoint writes that failed (the crawl kept going).
    pub save_failures: u64,
}

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Skipped { prefix_len: u8 },
    Unlocated,
    Probed { pops: usize },
    TimedOut,
    Failed,
    Done,
}

pub struct CrawlEngine<P> {
    prober: P,
    filter: KnownRangeFilter,
    geo_filter: Option<Box<dyn GeoOracle>>,
    store: CheckpointStore,
    state: CrawlState,
    stats: CrawlStats,
    delay: Duration,
    cooldown: Duration,
    end: u64,
    checkpoint_every: u64,
    last_scope: u8,
}

impl<P: Prober> CrawlEngine<P> {
    // Parameters:
    //   prober: sends the DNS queries
    //   config: delays, end of the crawl, checkpoint interval
    //   store: where checkpoints go
    //   state: a fresh state or one loaded from the last checkpoint
    pub fn new(prober: P, config: &CrawlConfig, store: CheckpointStore, state: CrawlState) -> Self {
        Self {
            prober,
            filter: KnownRangeFilter::google(),
            geo_filter: None,
            store,
            state,
            stats: CrawlStats::default(),
            delay: config.delay,
            cooldown: config.cooldown,
            end: config.end,
            checkpoint_every: config.checkpoint_every.max(1),
            last_scope: 0,
        }
    }

    /// Replaces the known-range table (the default is Google's netblocks).
    #[cfg(test)]
    pub fn with_filter(mut self, filter: KnownRangeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Skips addresses the oracle cannot place in a city.
    pub fn with_geo_filter(mut self, oracle: Box<dyn GeoOracle>) -> Self {
        self.geo_filter = Some(oracle);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    #[cfg(test)]
    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    // Runs until the cursor reaches the end or `shutdown` resolves, then
    // writes a final checkpoint.
    //
    // An interrupted iteration is simply dropped: state only changes after
    // a probe has completed, so nothing half-done is ever saved.
    //
    // Returns: the session totals. A non-zero `save_failures` means some
    // checkpoint writes were lost and a resume may repeat work.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> CrawlStats {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("interrupted, saving progress");
                    break;
                }
                step = self.step() => {
                    if step == Step::Done {
                        info!("reached end of address range");
                        break;
                    }
                }
            }
        }

        // Final save, so a clean exit never loses the tail of the crawl
        self.checkpoint().await;
        self.stats
    }

    /// Performs one iteration of the scan loop.
    pub async fn step(&mut self) -> Step {
        // Past the end (or past 255.255.255.255): nothing left to do
        if self.state.cursor.is_done(self.end) {
            return Step::Done;
        }
        let Some(ip) = self.state.cursor.address() else {
            return Step::Done;
        };

        // Known CDN range: jump over all of it without asking anyone
        if let Some(prefix_len) = self.filter.classify(ip) {
            debug!(%ip, prefix_len, "skipping known range");
            self.state.cursor.skip(prefix_len);
            self.stats.skipped += 1;
            return Step::Skipped { prefix_len };
        }

        // Optional pre-filter: a block the database cannot place in a city
        // would produce an observation nobody can locate later
        if let Some(oracle) = &self.geo_filter {
            if !oracle.has_city(ip) {
                let mask = self.state.cursor.mask();
                self.state.cursor.step_with(mask);
                self.stats.unlocated += 1;
                return Step::Unlocated;
            }
        }

        // Probe the block with the mask currently in force
        let mask = self.state.cursor.mask();
        let resolver_index = self.stats.probes as usize;
        let result = self.prober.probe(ip, mask, resolver_index).await;
        self.stats.probes += 1;

        let (step, pause) = self.apply(ip, mask, resolver_index, result);

        if self.stats.probes % self.checkpoint_every == 0 {
            self.checkpoint().await;
        }

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        step
    }

    // Folds one probe result into the state and picks the pause that
    // follows it.
    fn apply(&mut self, ip: Ipv4Addr, mask: u8, resolver_index: usize, result: ProbeResult) -> (Step, Duration) {
        let cursor = &mut self.state.cursor;

        match result {
            ProbeResult::Timeout => {
                self.stats.timeouts += 1;
                warn!(resolver = %self.prober.resolver_name(resolver_index), %ip, "timeout");
                // No scope information, so keep the step we had.
                cursor.step_with(mask);
                (Step::TimedOut, self.delay)
            }
            ProbeResult::NoAnswer => {
                self.stats.failures += 1;
                warn!(
                    resolver = %self.prober.resolver_name(resolver_index),
                    %ip,
                    cooldown = ?self.cooldown,
                    "no answer, cooling down"
                );
                // Back to a safe step, and give the resolver time to recover
                cursor.step_with(DEFAULT_MASK);
                (Step::Failed, self.cooldown)
            }
            ProbeResult::Answers { pops, scope, scope_echoed } => {
                if !scope_echoed {
                    debug!(%ip, "resolver did not echo a client-subnet option");
                }
                // One observation per PoP; the client is the probed block
                for pop in &pops {
                    self.state.registry.record(*pop, Observation { client: ip, scope });
                }
                // Remember the scope for the progress line
                self.last_scope = scope;
                // The scope says how far the same answer reaches
                cursor.step_with(next_mask(scope, mask));
                (Step::Probed { pops: pops.len() }, self.delay)
            }
        }
    }

    // Saves the current state and logs progress. A failure is never fatal:
    // the previous checkpoint is still intact, and the next one retries.
    async fn checkpoint(&mut self) {
        match self.store.save(&self.state.registry, &self.state.cursor).await {
            Ok(()) => self.report(),
            Err(e) => {
                self.stats.save_failures += 1;
                warn!(
                    error = %e,
                    failures = self.stats.save_failures,
                    "checkpoint failed, crawling on"
                );
            }
        }
    }

    fn report(&self) {
        let at = self
            .state
            .cursor
            .address()
            .map_or_else(|| "end".to_string(), |ip| ip.to_string());
        let errors = format!("{}/{}", self.stats.timeouts, self.stats.failures);
        info!(
            at = %at,
            mask = self.state.cursor.mask(),
            scope = self.last_scope,
            pops = self.state.registry.len(),
            observations = self.state.registry.observation_count(),
            errors = %errors,
            "progress saved to {}",
            self.store.path().display()
        );
    }
}
