use chrono::NaiveDate;
use serde::Serialize;

use crate::config::{CasesInto, SourceSpec};
use crate::dates;
use crate::error::RowSkip;
use crate::geo::{GeoPoint, LocationResolver};
use crate::sniff::{pick_nonempty, ColumnIndex};

/// The normalized, source-agnostic record shape used for indexing. Count
/// fields default to zero, identifiers to null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub location: Option<GeoPoint>,
    pub location_name: Option<String>,
    pub iso_code2: Option<String>,
    pub iso_region2: Option<String>,
    pub cases: i64,
    pub confirmed: i64,
    pub deaths: i64,
    pub recovered: i64,
    pub vaccinated: i64,
    pub tested: i64,
    pub max_population: i64,
    pub percentage: Option<f64>,
    pub filename: String,
}

/// Float-tolerant integer coercion: feeds write counts as "1000" or
/// "1000.0", and sparse cells coerce to zero rather than failing the row.
fn coerce_count(cell: Option<&str>) -> i64 {
    match cell {
        Some(s) => s.parse::<f64>().map(|f| f as i64).unwrap_or(0),
        None => 0,
    }
}

/// Turns raw rows of one file into canonical records, applying the
/// source's field semantics. One per (file, source) pair.
pub struct RowAssembler<'a> {
    source: &'a SourceSpec,
    index: &'a ColumnIndex,
    resolver: &'a LocationResolver,
    filename: &'a str,
}

impl<'a> RowAssembler<'a> {
    pub fn new(
        source: &'a SourceSpec,
        index: &'a ColumnIndex,
        resolver: &'a LocationResolver,
        filename: &'a str,
    ) -> Self {
        RowAssembler {
            source,
            index,
            resolver,
            filename,
        }
    }

    /// Assemble one record, or say why the row must be dropped. A missing
    /// or unparseable date always drops; an unresolved location drops only
    /// when the source declares location mandatory.
    pub fn assemble(&self, row: &csv::StringRecord) -> Result<CanonicalRecord, RowSkip> {
        if let Some(filter) = &self.source.row_filter {
            let cell = pick_nonempty(row, &self.index.row_filter).unwrap_or("");
            if cell != filter.equals {
                return Err(RowSkip::Filtered);
            }
        }

        let raw_date = pick_nonempty(row, &self.index.date).unwrap_or("");
        let interval = dates::normalize(raw_date)
            .ok_or_else(|| RowSkip::UnparseableDate(raw_date.to_string()))?;

        let raw_location = pick_nonempty(row, &self.index.location).unwrap_or("");
        let location = self
            .resolver
            .resolve(raw_location, self.source.geocode_fallback);
        if location.is_none() && self.source.location_required {
            return Err(RowSkip::LocationUnresolved(raw_location.to_string()));
        }

        let cases = coerce_count(pick_nonempty(row, &self.index.cases));
        let mut confirmed = 0;
        let mut vaccinated = coerce_count(pick_nonempty(row, &self.index.vaccinated));
        match self.source.cases_into {
            CasesInto::Confirmed => confirmed = cases,
            CasesInto::Vaccinated => vaccinated = cases,
        }

        let max_population = coerce_count(pick_nonempty(row, &self.index.population));
        let percentage = if max_population != 0 {
            Some(cases as f64 / max_population as f64 * 100.0)
        } else {
            None
        };

        let iso_region2 = self.source.region.as_ref().and_then(|region| {
            let raw = pick_nonempty(row, &self.index.region)?;
            let code = match &region.strip_prefix {
                Some(prefix) => raw.strip_prefix(prefix.as_str()).unwrap_or(raw),
                None => raw,
            };
            Some(format!("{}-{}", region.iso_prefix, code))
        });

        let (point, iso_code2) = match location {
            Some(loc) => {
                let iso = if loc.iso_code2.is_empty() {
                    None
                } else {
                    Some(loc.iso_code2)
                };
                (Some(loc.point), iso)
            }
            None => (None, None),
        };

        Ok(CanonicalRecord {
            date_start: interval.start,
            date_end: interval.end,
            location: point,
            location_name: pick_nonempty(row, &self.index.location_name).map(str::to_string),
            iso_code2,
            iso_region2,
            cases,
            confirmed,
            deaths: coerce_count(pick_nonempty(row, &self.index.deaths)),
            recovered: coerce_count(pick_nonempty(row, &self.index.recovered)),
            vaccinated,
            tested: coerce_count(pick_nonempty(row, &self.index.tested)),
            max_population,
            percentage,
            filename: self.filename.to_string(),
        })
    }
}
