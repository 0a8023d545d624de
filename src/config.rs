use std::{env, fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Batch size for bulk writes when MAX_BULK_ROWS is unset.
pub const DEFAULT_MAX_BATCH: usize = 1000;

/// Canonical field → ordered list of raw header aliases. One per source;
/// resolution always walks the list in order and takes the first match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub date: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub location_name: Vec<String>,
    #[serde(default)]
    pub cases: Vec<String>,
    #[serde(default)]
    pub deaths: Vec<String>,
    #[serde(default)]
    pub recovered: Vec<String>,
    #[serde(default)]
    pub vaccinated: Vec<String>,
    #[serde(default)]
    pub tested: Vec<String>,
    #[serde(default)]
    pub population: Vec<String>,
}

/// Which canonical count field the source's generic "cases" column also
/// populates. Vaccination feeds report doses, contamination feeds report
/// confirmed cases; the column shape is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasesInto {
    Confirmed,
    Vaccinated,
}

impl Default for CasesInto {
    fn default() -> Self {
        CasesInto::Confirmed
    }
}

/// ISO region code derivation, e.g. `maille_code` "DEP-75" → "FR-75".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSpec {
    pub aliases: Vec<String>,
    pub iso_prefix: String,
    #[serde(default)]
    pub strip_prefix: Option<String>,
}

/// Keep only rows whose filter column equals `equals`. The opencovid19-fr
/// feed mixes country/region/department granularities in one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFilter {
    pub aliases: Vec<String>,
    pub equals: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Short name; also the subdirectory of the data dir holding its files.
    pub name: String,
    /// Target index for emitted records.
    pub index: String,
    /// Feed URLs. A URL ending in ".csv" is downloaded directly; anything
    /// else is treated as an index page and scraped for ".csv" links.
    #[serde(default)]
    pub feeds: Vec<String>,
    pub columns: ColumnSpec,
    #[serde(default)]
    pub cases_into: CasesInto,
    #[serde(default = "default_true")]
    pub location_required: bool,
    #[serde(default = "default_true")]
    pub geocode_fallback: bool,
    #[serde(default)]
    pub region: Option<RegionSpec>,
    #[serde(default)]
    pub row_filter: Option<RowFilter>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lookup_path: PathBuf,
    pub max_batch: usize,
    pub workers: usize,
    pub geocoder_endpoint: String,
    pub geocoder_timeout: Duration,
    pub elastic: ElasticConfig,
    pub sources: Vec<SourceSpec>,
}

impl Config {
    /// Assemble configuration from the environment, with a YAML source file
    /// (SOURCES_FILE) overriding the built-in source specs.
    pub fn from_env() -> Result<Config> {
        let sources = match env::var("SOURCES_FILE") {
            Ok(path) => {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading sources file {}", path))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing sources file {}", path))?
            }
            Err(_) => default_sources(),
        };

        let scheme = env::var("ELASTIC_SCHEME").unwrap_or_else(|_| "http".into());
        let host = env::var("ELASTIC_ENDPOINT").unwrap_or_else(|_| "localhost".into());
        let port = env::var("ELASTIC_PORT").unwrap_or_else(|_| "9200".into());

        Ok(Config {
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".into()).into(),
            lookup_path: env::var("LOOKUP_TABLE")
                .unwrap_or_else(|_| "UID_ISO_FIPS_LookUp_Table.csv".into())
                .into(),
            max_batch: env::var("MAX_BULK_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_BATCH),
            workers: env::var("WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".into()),
            geocoder_timeout: Duration::from_secs(10),
            elastic: ElasticConfig {
                endpoint: format!("{}://{}:{}", scheme, host, port),
                user: env::var("ELASTIC_USER").ok(),
                password: env::var("ELASTIC_PWD").ok(),
            },
            sources,
        })
    }
}

fn svec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The six feeds the pipeline was built for. A SOURCES_FILE can replace
/// these wholesale; the shapes below double as documentation of the format.
pub fn default_sources() -> Vec<SourceSpec> {
    vec![
        SourceSpec {
            name: "vaccination".into(),
            index: "vaccination".into(),
            feeds: vec![],
            columns: ColumnSpec {
                date: svec(&["YearWeekISO", "dateRep", "date"]),
                location: svec(&["ReportingCountry", "location", "countriesAndTerritories"]),
                cases: svec(&["NumberDosesReceived", "new_vaccinations", "cases", "new_cases"]),
                population: svec(&["population"]),
                ..Default::default()
            },
            cases_into: CasesInto::Vaccinated,
            location_required: true,
            geocode_fallback: true,
            region: None,
            row_filter: None,
        },
        SourceSpec {
            name: "contamination".into(),
            index: "contamination".into(),
            feeds: vec![],
            columns: ColumnSpec {
                date: svec(&["YearWeekISO", "dateRep", "date"]),
                location: svec(&["ReportingCountry", "Region", "location", "countriesAndTerritories"]),
                cases: svec(&["cases", "new_cases"]),
                population: svec(&["population"]),
                ..Default::default()
            },
            cases_into: CasesInto::Confirmed,
            location_required: true,
            geocode_fallback: true,
            region: None,
            row_filter: None,
        },
        SourceSpec {
            name: "contamination-owid".into(),
            index: "contamination_owid".into(),
            feeds: vec![],
            columns: ColumnSpec {
                date: svec(&["date"]),
                location: svec(&["location"]),
                location_name: svec(&["location"]),
                cases: svec(&["new_cases"]),
                deaths: svec(&["new_deaths"]),
                vaccinated: svec(&["new_vaccinations"]),
                tested: svec(&["new_tests"]),
                ..Default::default()
            },
            cases_into: CasesInto::Confirmed,
            location_required: true,
            geocode_fallback: true,
            region: None,
            row_filter: None,
        },
        SourceSpec {
            name: "contamination-csse".into(),
            index: "contamination_csse".into(),
            feeds: vec![],
            columns: ColumnSpec {
                date: svec(&["Last Update", "Last_Update"]),
                location: svec(&[
                    "Country_Region",
                    "Country/Region",
                    "Province_State",
                    "Province/State",
                ]),
                cases: svec(&["Confirmed"]),
                deaths: svec(&["Deaths"]),
                recovered: svec(&["Recovered"]),
                ..Default::default()
            },
            cases_into: CasesInto::Confirmed,
            location_required: true,
            geocode_fallback: true,
            region: None,
            row_filter: None,
        },
        SourceSpec {
            name: "opencovid19-fr".into(),
            index: "opencovid19_fr".into(),
            feeds: vec![
                "https://raw.githubusercontent.com/opencovid19-fr/data/master/dist/chiffres-cles.csv"
                    .into(),
            ],
            columns: ColumnSpec {
                date: svec(&["date"]),
                location: svec(&["maille_nom"]),
                location_name: svec(&["maille_nom"]),
                cases: svec(&["cas_confirmes"]),
                deaths: svec(&["deces"]),
                recovered: svec(&["gueris"]),
                ..Default::default()
            },
            cases_into: CasesInto::Confirmed,
            location_required: true,
            geocode_fallback: true,
            region: Some(RegionSpec {
                aliases: svec(&["maille_code"]),
                iso_prefix: "FR".into(),
                strip_prefix: Some("DEP-".into()),
            }),
            row_filter: Some(RowFilter {
                aliases: svec(&["granularite"]),
                equals: "departement".into(),
            }),
        },
        SourceSpec {
            name: "france-virtests".into(),
            index: "france_virtests".into(),
            feeds: vec![],
            columns: ColumnSpec {
                date: svec(&["jour"]),
                location: svec(&["dep"]),
                location_name: svec(&["dep"]),
                cases: svec(&["P"]),
                tested: svec(&["T"]),
                ..Default::default()
            },
            cases_into: CasesInto::Confirmed,
            location_required: false,
            geocode_fallback: false,
            region: Some(RegionSpec {
                aliases: svec(&["dep"]),
                iso_prefix: "FR".into(),
                strip_prefix: None,
            }),
            row_filter: None,
        },
    ]
}
