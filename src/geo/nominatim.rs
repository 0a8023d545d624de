use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{GeoLocation, GeoPoint, Geocoder};

/// Nominatim-style HTTP geocoder. Blocking on purpose: resolution happens
/// inside the synchronous per-file pipeline, and the request timeout bounds
/// the latency the pipeline can be stalled by.
pub struct Nominatim {
    client: reqwest::blocking::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    country_code: Option<String>,
}

impl Nominatim {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Nominatim> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building geocoder HTTP client")?;
        Ok(Nominatim {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl Geocoder for Nominatim {
    /// One search query, best match only. Missing coordinates or a missing
    /// country code in the structured address both mean "no result".
    fn geocode(&self, query: &str) -> Result<Option<GeoLocation>> {
        let url = format!("{}/search", self.endpoint);
        let places: Vec<Place> = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
            ])
            .send()
            .with_context(|| format!("geocoding {:?}", query))?
            .error_for_status()
            .with_context(|| format!("geocoding {:?}", query))?
            .json()
            .with_context(|| format!("decoding geocoder response for {:?}", query))?;

        let place = match places.into_iter().next() {
            Some(p) => p,
            None => return Ok(None),
        };
        debug!(query, lat = %place.lat, lon = %place.lon, "geocoder match");

        let country_code = match place.address.and_then(|a| a.country_code) {
            Some(code) => code.to_uppercase(),
            None => return Ok(None),
        };
        let (lat, lon) = match (place.lat.parse(), place.lon.parse()) {
            (Ok(lat), Ok(lon)) => (lat, lon),
            _ => return Ok(None),
        };

        Ok(Some(GeoLocation {
            point: GeoPoint { lat, lon },
            iso_code2: country_code,
        }))
    }
}
