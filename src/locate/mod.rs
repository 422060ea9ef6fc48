// src/locate/mod.rs
// =============================================================================
// Offline pass over a finished crawl: where is each PoP?
//
// Submodules:
// - centroid: trimmed-mean location estimate per PoP
// - report: CSV / JSON output
// =============================================================================

mod centroid;
mod report;

pub use centroid::estimate_all;
pub use report::{write_csv, write_json};
