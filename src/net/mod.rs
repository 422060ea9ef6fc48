// src/net/mod.rs
// =============================================================================
// Address arithmetic shared by the crawler and the estimator.
//
// Submodules:
// - cursor: prefix helpers (mask_for, block_size, network_of, advance) and
//   the AddressCursor that tracks crawl progress
// =============================================================================

mod cursor;

pub use cursor::{network_of, AddressCursor};

#[cfg(test)]
pub use cursor::advance;
