// src/crawl/step.rs
// =============================================================================
// Picks the next step mask from the scope a resolver echoed back.
//
// The scope is the prefix length the authoritative server says it actually
// used to choose its answer. Everything inside that prefix gets the same
// answer, so the crawler can jump straight over it.
//
// Policy, in order:
//   scope 0   -> DEFAULT_MASK (/24): no precision info, take a safe step
//   scope 32  -> BIG_JUMP_MASK (/17): the range is not geo-partitioned
//   otherwise -> scope itself
// =============================================================================

/// Step used when a resolver gives no precision signal, and the starting mask.
pub const DEFAULT_MASK: u8 = 24;

/// Step used when a resolver answers with full-host precision.
pub const BIG_JUMP_MASK: u8 = 17;

// `_current` is accepted so callers always pass the mask in force; the
// policy does not depend on it.
pub fn next_mask(scope: u8, _current: u8) -> u8 {
    match scope.min(32) {
        0 => DEFAULT_MASK,
        32 => BIG_JUMP_MASK,
        scope => scope,
    }
}
