// src/store/mod.rs
// =============================================================================
// Crawl results and their persistence.
//
// Submodules:
// - registry: PoPKey -> observations map built up during a crawl
// - checkpoint: atomic, versioned save/load of (registry, cursor)
// =============================================================================

mod checkpoint;
mod registry;

pub use checkpoint::{CheckpointStore, CrawlState};
pub use registry::{Observation, PopKey, PopRegistry};
