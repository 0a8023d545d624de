use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;

use super::{GeoLocation, GeoPoint, Geocoder};

/// Test double for the external geocoder: canned answers plus a call
/// counter for cache-discipline assertions.
pub(crate) struct StubGeocoder {
    pub calls: Arc<AtomicUsize>,
    results: HashMap<String, Option<GeoLocation>>,
    fail: bool,
}

impl StubGeocoder {
    pub(crate) fn resolving(entries: &[(&str, f64, f64, &str)]) -> Self {
        StubGeocoder {
            calls: Arc::new(AtomicUsize::new(0)),
            results: entries
                .iter()
                .map(|&(name, lat, lon, iso)| {
                    (
                        name.to_string(),
                        Some(GeoLocation {
                            point: GeoPoint { lat, lon },
                            iso_code2: iso.to_string(),
                        }),
                    )
                })
                .collect(),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        StubGeocoder {
            calls: Arc::new(AtomicUsize::new(0)),
            results: HashMap::new(),
            fail: true,
        }
    }
}

impl Geocoder for StubGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<GeoLocation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("connection refused");
        }
        Ok(self.results.get(query).cloned().flatten())
    }
}
