// src/net/cursor.rs
// =============================================================================
// IPv4 prefix arithmetic and the crawl cursor.
//
// The crawler walks the address space in blocks. A block is described by a
// mask (prefix length) between 1 and 32. Every helper here is defined for
// that whole range, including /32 (a single host, block size 1) and /1
// (half of the address space).
//
// The cursor value is kept in a u64 so that stepping past 255.255.255.255
// lands on 2^32 instead of wrapping back to 0.0.0.0.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Smallest mask the crawler will ever use (a /1 block).
pub const MIN_MASK: u8 = 1;
/// Largest mask the crawler will ever use (a single host).
pub const MAX_MASK: u8 = 32;

// Clamps a prefix length into [MIN_MASK, MAX_MASK] so the shifts below can
// never overflow.
fn clamp_mask(mask: u8) -> u8 {
    mask.clamp(MIN_MASK, MAX_MASK)
}

/// Netmask with the top `prefix_len` bits set, e.g. 24 -> 255.255.255.0
pub fn mask_for(prefix_len: u8) -> u32 {
    u32::MAX << (32 - u32::from(clamp_mask(prefix_len)))
}

/// Number of addresses covered by one block of the given mask.
pub fn block_size(mask: u8) -> u64 {
    1u64 << (32 - u32::from(clamp_mask(mask)))
}

/// The network address of `ip` once truncated to `mask` bits.
pub fn network_of(ip: u32, mask: u8) -> u32 {
    ip & mask_for(mask)
}

// Jumps to the start of the next block.
//
// Parameters:
//   value: current position (may be anywhere inside a block)
//   mask: block size to step over
//
// Returns: the first address of the following `mask`-sized block.
//
// Rounding down first means a mask change between calls still moves
// forward and always lands on a boundary of the new mask, which the
// client-subnet option of the next probe requires.
pub fn advance(value: u64, mask: u8) -> u64 {
    let size = block_size(mask);
    (value & !(size - 1)) + size
}

/// Where the crawl currently is: an address plus the step mask that will
/// be used for the next probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCursor {
    value: u64,
    mask: u8,
}

impl AddressCursor {
    pub fn new(start: Ipv4Addr, mask: u8) -> Self {
        Self {
            value: u64::from(u32::from(start)),
            mask: clamp_mask(mask),
        }
    }

    #[cfg(test)]
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// The address under the cursor, or None once it has stepped past the
    /// top of the IPv4 space.
    pub fn address(&self) -> Option<Ipv4Addr> {
        u32::try_from(self.value).ok().map(Ipv4Addr::from)
    }

    /// Skips one block of `prefix_len` without touching the step mask.
    pub fn skip(&mut self, prefix_len: u8) {
        self.value = advance(self.value, prefix_len);
    }

    /// Adopts `mask` as the new step mask and moves over one block of it.
    pub fn step_with(&mut self, mask: u8) {
        self.mask = clamp_mask(mask);
        self.value = advance(self.value, self.mask);
    }

    pub fn is_done(&self, end: u64) -> bool {
        self.value >= end
    }

    /// Checks the invariants a freshly loaded cursor must satisfy.
    pub fn is_valid(&self) -> bool {
        (MIN_MASK..=MAX_MASK).contains(&self.mask) && self.value <= 1u64 << 32
    }
}
