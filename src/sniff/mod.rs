use tracing::{debug, warn};

use crate::config::SourceSpec;
use crate::error::FileError;

/// How much of a file the sniffer looks at. Large feeds are multi-hundred
/// MB; the dialect is decidable from the first lines.
pub const SAMPLE_WINDOW: usize = 100_000;

const DELIMITER_CANDIDATES: &[u8] = b",;\t|";

/// Field delimiter and quote convention of one tabular file, inferred from
/// a sample rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

/// Infer the dialect from a sample window of the file's bytes.
///
/// A delimiter qualifies when it appears outside quotes on every sampled
/// line with a consistent count; among qualifying candidates the one with
/// the most columns wins. Empty or binary samples, and samples where no
/// candidate qualifies, are a `DialectDetection` failure — the caller skips
/// the file and the run continues.
pub fn sniff_dialect(sample: &[u8], file: &str) -> Result<Dialect, FileError> {
    if sample.is_empty() {
        return Err(FileError::DialectDetection {
            file: file.to_string(),
            reason: "empty sample".into(),
        });
    }
    if sample.contains(&0) {
        return Err(FileError::DialectDetection {
            file: file.to_string(),
            reason: "binary content".into(),
        });
    }

    let quote = infer_quote(sample);
    let lines = sample_lines(sample);
    if lines.is_empty() {
        return Err(FileError::DialectDetection {
            file: file.to_string(),
            reason: "no complete line in sample".into(),
        });
    }

    let mut best: Option<(u8, usize)> = None;
    for &delim in DELIMITER_CANDIDATES {
        let mut counts = lines.iter().map(|l| count_unquoted(l, delim, quote));
        let first = match counts.next() {
            Some(n) if n > 0 => n,
            _ => continue,
        };
        if counts.all(|n| n == first) && best.map_or(true, |(_, n)| first > n) {
            best = Some((delim, first));
        }
    }

    match best {
        Some((delimiter, fields)) => {
            debug!(
                file,
                delimiter = %(delimiter as char),
                fields = fields + 1,
                "sniffed dialect"
            );
            Ok(Dialect { delimiter, quote })
        }
        None => Err(FileError::DialectDetection {
            file: file.to_string(),
            reason: "no consistent delimiter in sample".into(),
        }),
    }
}

/// Complete, non-empty lines of the sample. A trailing partial line (the
/// window usually cuts mid-row) is dropped unless it is all we have.
fn sample_lines(sample: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = sample
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .filter(|l| !l.is_empty())
        .collect();
    if !sample.ends_with(b"\n") && lines.len() > 1 {
        lines.pop();
    }
    lines.truncate(50);
    lines
}

fn infer_quote(sample: &[u8]) -> u8 {
    if sample.contains(&b'"') {
        b'"'
    } else if sample.contains(&b'\'') {
        b'\''
    } else {
        b'"'
    }
}

fn count_unquoted(line: &[u8], delim: u8, quote: u8) -> usize {
    let mut count = 0;
    let mut in_quotes = false;
    for &b in line {
        if b == quote {
            in_quotes = !in_quotes;
        } else if b == delim && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Positions of each canonical field's candidate columns within one file,
/// resolved from the header row. Built once per file and never mutated;
/// candidate order follows the alias priority of the source's ColumnSpec.
#[derive(Debug, Default, Clone)]
pub struct ColumnIndex {
    pub date: Vec<usize>,
    pub location: Vec<usize>,
    pub location_name: Vec<usize>,
    pub cases: Vec<usize>,
    pub deaths: Vec<usize>,
    pub recovered: Vec<usize>,
    pub vaccinated: Vec<usize>,
    pub tested: Vec<usize>,
    pub population: Vec<usize>,
    pub region: Vec<usize>,
    pub row_filter: Vec<usize>,
}

impl ColumnIndex {
    /// Resolve header cells against the source's alias lists, by name and
    /// never by position. A mandatory field (date; location when the source
    /// requires one) with no matching header cell marks the file malformed.
    pub fn resolve(
        source: &SourceSpec,
        header: &[String],
        file: &str,
    ) -> Result<ColumnIndex, FileError> {
        let find = |aliases: &[String]| -> Vec<usize> {
            aliases
                .iter()
                .filter_map(|alias| header.iter().position(|cell| cell.trim() == alias.as_str()))
                .collect()
        };

        let index = ColumnIndex {
            date: find(&source.columns.date),
            location: find(&source.columns.location),
            location_name: find(&source.columns.location_name),
            cases: find(&source.columns.cases),
            deaths: find(&source.columns.deaths),
            recovered: find(&source.columns.recovered),
            vaccinated: find(&source.columns.vaccinated),
            tested: find(&source.columns.tested),
            population: find(&source.columns.population),
            region: source
                .region
                .as_ref()
                .map(|r| find(&r.aliases))
                .unwrap_or_default(),
            row_filter: source
                .row_filter
                .as_ref()
                .map(|f| find(&f.aliases))
                .unwrap_or_default(),
        };

        if index.date.is_empty() {
            return Err(FileError::HeaderResolution {
                file: file.to_string(),
                field: "date",
            });
        }
        if source.location_required && index.location.is_empty() {
            return Err(FileError::HeaderResolution {
                file: file.to_string(),
                field: "location",
            });
        }
        if index.cases.is_empty() {
            warn!(file, "no cases column resolved; counts will be zero");
        }
        debug!(file, ?index, "resolved columns");
        Ok(index)
    }
}

/// First non-empty cell among the field's candidate columns, trimmed.
pub fn pick_nonempty<'a>(row: &'a csv::StringRecord, candidates: &[usize]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|&i| row.get(i))
        .map(str::trim)
        .find(|cell| !cell.is_empty())
}
