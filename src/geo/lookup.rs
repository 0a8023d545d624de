use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::sniff::{sniff_dialect, SAMPLE_WINDOW};

use super::{GeoLocation, GeoPoint};

/// Known location name variants → geolocation, built once at startup from
/// the UID/ISO/FIPS reference CSV and read-only afterwards.
pub type LookupTable = HashMap<String, GeoLocation>;

// Column offsets of the reference dataset.
const COL_ISO2: usize = 1;
const COL_PROVINCE_STATE: usize = 6;
const COL_COUNTRY_REGION: usize = 7;
const COL_LAT: usize = 8;
const COL_LON: usize = 9;
const COL_COMBINED_KEY: usize = 10;

/// Load the reference table. Each row contributes up to three name
/// variants (province/state, country/region, combined key); the first row
/// to claim a name wins, and rows without both coordinates are skipped.
pub fn load_lookup_table(path: &Path) -> Result<LookupTable> {
    let mut file =
        File::open(path).with_context(|| format!("opening lookup table {}", path.display()))?;

    let mut sample = Vec::with_capacity(SAMPLE_WINDOW);
    (&mut file)
        .take(SAMPLE_WINDOW as u64)
        .read_to_end(&mut sample)
        .with_context(|| format!("sampling lookup table {}", path.display()))?;
    let dialect = sniff_dialect(&sample, &path.display().to_string())?;
    file.seek(SeekFrom::Start(0))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut lookup = LookupTable::new();
    for (i, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("lookup table {} record {}", path.display(), i))?;
        let lat = record.get(COL_LAT).and_then(|s| s.trim().parse::<f64>().ok());
        let lon = record.get(COL_LON).and_then(|s| s.trim().parse::<f64>().ok());
        let (lat, lon) = match (lat, lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => continue,
        };
        let iso2 = record.get(COL_ISO2).unwrap_or("").trim().to_string();

        for col in [COL_PROVINCE_STATE, COL_COUNTRY_REGION, COL_COMBINED_KEY] {
            let name = record.get(col).unwrap_or("").trim();
            if !name.is_empty() && !lookup.contains_key(name) {
                lookup.insert(
                    name.to_string(),
                    GeoLocation {
                        point: GeoPoint { lat, lon },
                        iso_code2: iso2.clone(),
                    },
                );
            }
        }
    }

    info!(path = %path.display(), locations = lookup.len(), "loaded lookup table");
    Ok(lookup)
}
