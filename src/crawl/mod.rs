// src/crawl/mod.rs
// =============================================================================
// This module walks the IPv4 address space with client-subnet probes.
//
// Features:
// - Adaptive step size driven by the scope the resolver echoes back
// - Skips the CDN operator's own netblocks in one jump
// - Optional GeoIP pre-filter for unrouted space
// - Periodic atomic checkpoints, resumable after any interruption
// - Polite crawling: fixed delay between probes, long cooldown when the
//   resolver stops answering
//
// Submodules:
// - known_ranges: the skip table
// - step: scope -> next mask policy
// - engine: the scan loop itself
// =============================================================================

mod engine;
mod known_ranges;
mod step;

pub use engine::CrawlEngine;
pub use known_ranges::KnownRangeFilter;
pub use step::DEFAULT_MASK;
