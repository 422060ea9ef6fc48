// src/probe/mod.rs
// =============================================================================
// One DNS probe = one question: "if a client in this subnet asked for the
// CDN's hostname, which front-ends would it get, and how precise was the
// answer?"
//
// Submodules:
// - dns: the real prober, EDNS client-subnet queries over UDP
//
// The crawl engine only talks to the Prober trait, so tests can script the
// responses and count calls without touching the network.
// =============================================================================

mod dns;

pub use dns::DnsProber;

use crate::store::PopKey;
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Normalized outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// At least one A record came back.
    Answers {
        /// Distinct /24 networks of the answer addresses.
        pops: BTreeSet<PopKey>,
        /// Scope prefix from the echoed client-subnet option, 0 if none.
        scope: u8,
        /// Whether the resolver echoed a client-subnet option at all.
        scope_echoed: bool,
    },
    /// No response within the timeout.
    Timeout,
    /// A response with no usable A records.
    NoAnswer,
}

pub trait Prober {
    // Sends one query for a client at `ip`, truncated to `mask` bits.
    //
    // `resolver_index` picks the resolver round-robin; implementations
    // take it modulo their pool size.
    fn probe(&self, ip: Ipv4Addr, mask: u8, resolver_index: usize) -> BoxFuture<'_, ProbeResult>;

    /// Human readable name of the resolver `resolver_index` maps to.
    fn resolver_name(&self, resolver_index: usize) -> String {
        format!("resolver #{resolver_index}")
    }
}
