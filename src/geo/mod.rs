use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod lookup;
pub mod nominatim;
#[cfg(test)]
pub(crate) mod testutil;

pub use lookup::{load_lookup_table, LookupTable};
pub use nominatim::Nominatim;

/// A latitude/longitude pair, shaped for a geo_point index field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A resolved location. `iso_code2` may be empty for lookup-table entries
/// whose reference row carries no code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub point: GeoPoint,
    pub iso_code2: String,
}

/// External geocoding service. Behind a trait so tests can count calls and
/// inject failures; production uses [`Nominatim`].
pub trait Geocoder: Send + Sync {
    fn geocode(&self, query: &str) -> Result<Option<GeoLocation>>;
}

/// Maps raw location strings to geolocations: cache, then lookup table,
/// then (when the source allows it) the external geocoder.
///
/// The cache lives for one run and is monotonic — once a name is recorded,
/// resolved or unresolvable, it is never overwritten, so a raw string hits
/// the external service at most once per run. The mutex is held across the
/// external call, which also keeps duplicate names in concurrently
/// processed files from racing to geocode the same string.
pub struct LocationResolver {
    lookup: LookupTable,
    cache: Mutex<HashMap<String, Option<GeoLocation>>>,
    geocoder: Box<dyn Geocoder>,
    aliases: HashMap<String, String>,
}

impl LocationResolver {
    pub fn new(lookup: LookupTable, geocoder: Box<dyn Geocoder>) -> Self {
        let mut cache = HashMap::new();
        // aggregate rows, never a real place
        cache.insert("World".to_string(), None);
        LocationResolver {
            lookup,
            cache: Mutex::new(cache),
            geocoder,
            // EL is the EU reporting code for Greece; Nominatim only knows GR
            aliases: HashMap::from([("EL".to_string(), "GR".to_string())]),
        }
    }

    /// Resolve a raw location name. `None` is non-fatal: the caller drops
    /// the row or emits without a geopoint, depending on the source.
    /// `allow_geocode` gates the external fallback for lookup-only sources.
    pub fn resolve(&self, name: &str, allow_geocode: bool) -> Option<GeoLocation> {
        if name.is_empty() {
            return None;
        }

        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.get(name) {
            return cached.clone();
        }
        if let Some(known) = self.lookup.get(name) {
            cache.insert(name.to_string(), Some(known.clone()));
            return Some(known.clone());
        }
        if !allow_geocode {
            return None;
        }

        let query = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        info!(name, query, "guessing geolocation");
        let resolved = match self.geocoder.geocode(query) {
            Ok(Some(loc)) => {
                info!(name, lat = loc.point.lat, lon = loc.point.lon, "located");
                Some(loc)
            }
            Ok(None) => {
                warn!(name, "geocoder found no coordinates or country code");
                None
            }
            Err(e) => {
                warn!(name, error = %e, "geocoding failed");
                None
            }
        };
        cache.insert(name.to_string(), resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::StubGeocoder;
    use super::*;
    use std::sync::atomic::Ordering;

    fn france() -> GeoLocation {
        GeoLocation {
            point: GeoPoint {
                lat: 46.603354,
                lon: 1.8883335,
            },
            iso_code2: "FR".to_string(),
        }
    }

    #[test]
    fn second_resolution_is_served_from_cache() {
        let stub = StubGeocoder::resolving(&[("France", 46.603354, 1.8883335, "FR")]);
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));

        let first = resolver.resolve("France", true).unwrap();
        let second = resolver.resolve("France", true).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_hit_skips_the_geocoder() {
        let stub = StubGeocoder::failing();
        let calls = stub.calls.clone();
        let mut lookup = LookupTable::new();
        lookup.insert("France".to_string(), france());
        let resolver = LocationResolver::new(lookup, Box::new(stub));

        assert_eq!(resolver.resolve("France", true), Some(france()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_geocoding_is_cached_as_unresolvable() {
        let stub = StubGeocoder::failing();
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));

        assert_eq!(resolver.resolve("Atlantis", true), None);
        assert_eq!(resolver.resolve("Atlantis", true), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn alias_remaps_the_query_not_the_cache_key() {
        let stub = StubGeocoder::resolving(&[("GR", 39.0742, 21.8243, "GR")]);
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));

        let loc = resolver.resolve("EL", true).unwrap();
        assert_eq!(loc.iso_code2, "GR");
        // cached under the raw name
        resolver.resolve("EL", true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn geocoder_disabled_means_lookup_only() {
        let stub = StubGeocoder::resolving(&[("France", 46.6, 1.9, "FR")]);
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));

        assert_eq!(resolver.resolve("France", false), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn world_is_preseeded_unresolvable() {
        let stub = StubGeocoder::resolving(&[("World", 0.0, 0.0, "??")]);
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));

        assert_eq!(resolver.resolve("World", true), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
