// src/store/registry.rs
// =============================================================================
// In-memory record of which client addresses mapped to which PoP.
//
// A PoP (point of presence) is identified by the /24 network of the
// address it answered with. Every successful probe appends one Observation
// per PoP it returned. Observations are never removed during a run.
//
// BTreeMap keeps the PoPs sorted, so checkpoints and reports come out in a
// stable order.
// =============================================================================

use crate::net::network_of;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

/// A /24-normalized front-end address, e.g. `172.217.5.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PopKey(Ipv4Addr);

impl PopKey {
    /// Collapses an answer address to the /24 that names its PoP.
    pub fn from_answer(addr: Ipv4Addr) -> Self {
        Self(Ipv4Addr::from(network_of(u32::from(addr), 24)))
    }
}

impl fmt::Display for PopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One probe's evidence that `client` is served by a given PoP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub client: Ipv4Addr,
    pub scope: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PopRegistry {
    pops: BTreeMap<PopKey, Vec<Observation>>,
}

impl PopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pop: PopKey, observation: Observation) {
        self.pops.entry(pop).or_default().push(observation);
    }

    /// Number of distinct PoPs seen so far.
    pub fn len(&self) -> usize {
        self.pops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pops.is_empty()
    }

    pub fn observation_count(&self) -> usize {
        self.pops.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn get(&self, pop: &PopKey) -> Option<&[Observation]> {
        self.pops.get(pop).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PopKey, &[Observation])> {
        self.pops.iter().map(|(pop, obs)| (pop, obs.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_key_normalizes_to_slash_24() {
        let key = PopKey::from_answer(Ipv4Addr::new(172, 217, 5, 110));
        assert_eq!(key.to_string(), "172.217.5.0");
        assert_eq!(key, PopKey::from_answer(Ipv4Addr::new(172, 217, 5, 3)));
    }

    #[test]
    fn test_record_appends_in_order() {
        let mut registry = PopRegistry::new();
        let pop = PopKey::from_answer(Ipv4Addr::new(10, 1, 1, 1));
        registry.record(pop, Observation { client: Ipv4Addr::new(1, 0, 0, 0), scope: 24 });
        registry.record(pop, Observation { client: Ipv4Addr::new(1, 0, 1, 0), scope: 20 });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.observation_count(), 2);
        let observations = registry.get(&pop).unwrap();
        assert_eq!(observations[0].client, Ipv4Addr::new(1, 0, 0, 0));
        assert_eq!(observations[1].scope, 20);
    }

    #[test]
    fn test_json_shape() {
        let mut registry = PopRegistry::new();
        registry.record(
            PopKey::from_answer(Ipv4Addr::new(10, 1, 1, 1)),
            Observation { client: Ipv4Addr::new(1, 2, 3, 0), scope: 24 },
        );
        let json = serde_json::to_value(&registry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "10.1.1.0": [{ "client": "1.2.3.0", "scope": 24 }] })
        );
    }
}
