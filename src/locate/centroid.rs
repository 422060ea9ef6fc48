// src/locate/centroid.rs
// =============================================================================
// Turns a PoP's noisy client locations into one representative point.
//
// The approach is a deliberately simple heuristic, not geodesy:
// 1. Look up every client address; drop known-range clients (probing
//    artifacts) and clients the database cannot place.
// 2. Average latitude and longitude over all samples.
// 3. With 4 or more samples, drop the 25% farthest from that average
//    (squared euclidean distance in lat/lon) and average the rest once.
//
// Plain averaging of degrees is only an approximation; it is good enough
// to tell which metro area a PoP serves.
// =============================================================================

use crate::crawl::KnownRangeFilter;
use crate::geo::GeoOracle;
use crate::store::{Observation, PopKey, PopRegistry};
use serde::Serialize;
use std::collections::BTreeSet;

/// Below this many samples the plain mean is reported untrimmed.
pub const TRIM_MIN_SAMPLES: usize = 4;

/// Output row: where a PoP probably is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Centroid {
    pub pop: PopKey,
    /// Located samples before trimming.
    pub sample_count: usize,
    /// Distinct region names seen across all samples.
    pub labels: BTreeSet<String>,
    pub lat: f64,
    pub lon: f64,
}

/// One client address the oracle could place.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedSample {
    pub lat: f64,
    pub lon: f64,
    pub region: Option<String>,
}

// Looks up every observation's client, keeping only real end-user
// locations with a city and coordinates.
pub fn collect_samples(
    observations: &[Observation],
    filter: &KnownRangeFilter,
    oracle: &dyn GeoOracle,
) -> Vec<LocatedSample> {
    observations
        .iter()
        .filter(|obs| filter.classify(obs.client).is_none())
        .filter_map(|obs| oracle.lookup(obs.client))
        .filter_map(|geo| match (geo.city, geo.lat, geo.lon) {
            (Some(_), Some(lat), Some(lon)) => Some(LocatedSample {
                lat,
                lon,
                region: geo.region,
            }),
            _ => None,
        })
        .collect()
}

fn mean<'a>(samples: impl ExactSizeIterator<Item = &'a LocatedSample>) -> (f64, f64) {
    let n = samples.len() as f64;
    let (lat, lon) = samples.fold((0.0, 0.0), |(lat, lon), s| (lat + s.lat, lon + s.lon));
    (lat / n, lon / n)
}

/// Trimmed mean of the samples, or None when there are none.
pub fn find_center(samples: &[LocatedSample]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }

    let (avg_lat, avg_lon) = mean(samples.iter());
    if samples.len() < TRIM_MIN_SAMPLES {
        return Some((avg_lat, avg_lon));
    }

    let mut by_distance: Vec<(f64, &LocatedSample)> = samples
        .iter()
        .map(|s| ((s.lat - avg_lat).powi(2) + (s.lon - avg_lon).powi(2), s))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Keep the closest 75%, rounded down.
    let keep = samples.len() * 3 / 4;
    Some(mean(by_distance[..keep].iter().map(|(_, s)| *s)))
}

pub fn estimate(
    pop: PopKey,
    observations: &[Observation],
    filter: &KnownRangeFilter,
    oracle: &dyn GeoOracle,
) -> Option<Centroid> {
    let samples = collect_samples(observations, filter, oracle);
    let (lat, lon) = find_center(&samples)?;

    // Labels come from every sample, trimmed or not.
    let labels = samples
        .iter()
        .filter_map(|s| s.region.as_deref())
        .filter(|region| !region.is_empty())
        .map(str::to_string)
        .collect();

    Some(Centroid {
        pop,
        sample_count: samples.len(),
        labels,
        lat,
        lon,
    })
}

/// One centroid per PoP that has at least one located sample.
pub fn estimate_all(registry: &PopRegistry, filter: &KnownRangeFilter, oracle: &dyn GeoOracle) -> Vec<Centroid> {
    registry
        .iter()
        .filter_map(|(pop, observations)| estimate(*pop, observations, filter, oracle))
        .collect()
}
