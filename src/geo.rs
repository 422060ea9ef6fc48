// src/geo.rs
// =============================================================================
// IP geolocation.
//
// Both the crawler (optional pre-filter) and the estimator need to ask
// "where is this client address?". They do it through the GeoOracle trait
// so tests can supply a fixed table instead of a real database.
//
// The production oracle reads a MaxMind GeoLite2-City database. Failing to
// open it is the one fatal error of the whole tool: without it no location
// can ever be produced.
// =============================================================================

use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to open GeoIP database {}: {source}", path.display())]
    OracleInit {
        path: PathBuf,
        #[source]
        source: MaxMindDBError,
    },
}

/// What the database knows about one address. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoSample {
    pub city: Option<String>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub trait GeoOracle: Send + Sync {
    /// None means the address is not in the database at all.
    fn lookup(&self, ip: Ipv4Addr) -> Option<GeoSample>;

    /// True when the address resolves to a named city, i.e. it looks like
    /// routed, end-user address space.
    fn has_city(&self, ip: Ipv4Addr) -> bool {
        self.lookup(ip).map_or(false, |sample| sample.city.is_some())
    }
}

pub struct MaxMindOracle {
    reader: Reader<Vec<u8>>,
}

impl MaxMindOracle {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(path).map_err(|source| GeoError::OracleInit {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { reader })
    }
}

// GeoLite2 stores names per language; we report the English one.
fn english(names: Option<&BTreeMap<&str, &str>>) -> Option<String> {
    names.and_then(|names| names.get("en")).map(|name| name.to_string())
}

impl GeoOracle for MaxMindOracle {
    fn lookup(&self, ip: Ipv4Addr) -> Option<GeoSample> {
        let record: geoip2::City = match self.reader.lookup(IpAddr::V4(ip)) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return None,
            Err(e) => {
                debug!(%ip, error = %e, "GeoIP lookup failed");
                return None;
            }
        };

        let city = english(record.city.as_ref().and_then(|city| city.names.as_ref()));
        // The most specific subdivision is the last one (state before county).
        let region = english(
            record
                .subdivisions
                .as_ref()
                .and_then(|subs| subs.last())
                .and_then(|sub| sub.names.as_ref()),
        );
        let (lat, lon) = record
            .location
            .as_ref()
            .map_or((None, None), |loc| (loc.latitude, loc.longitude));

        Some(GeoSample { city, region, lat, lon })
    }
}

/// Fixed-answer oracle used by the crawl and estimator tests.
#[cfg(test)]
#[derive(Default)]
pub struct TableOracle {
    entries: std::collections::HashMap<Ipv4Addr, GeoSample>,
}

#[cfg(test)]
impl TableOracle {
    pub fn with(mut self, ip: Ipv4Addr, city: &str, region: &str, lat: f64, lon: f64) -> Self {
        self.entries.insert(
            ip,
            GeoSample {
                city: Some(city.to_string()),
                region: Some(region.to_string()),
                lat: Some(lat),
                lon: Some(lon),
            },
        );
        self
    }

    pub fn with_sample(mut self, ip: Ipv4Addr, sample: GeoSample) -> Self {
        self.entries.insert(ip, sample);
        self
    }
}

#[cfg(test)]
impl GeoOracle for TableOracle {
    fn lookup(&self, ip: Ipv4Addr) -> Option<GeoSample> {
        self.entries.get(&ip).cloned()
    }
}
