use std::fmt;

use thiserror::Error;

/// Failures that abort the current file. The run continues with the next
/// file; the driver logs these and moves on.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("dialect detection failed for {file}: {reason}")]
    DialectDetection { file: String, reason: String },

    #[error("header of {file} has no column for mandatory field `{field}`")]
    HeaderResolution { file: String, field: &'static str },

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error on {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink rejected batch of {len} records: {reason}")]
    Sink { len: usize, reason: String },
}

/// Why a row was dropped. These are outcomes, not errors: the row is
/// skipped, counted, and the file keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    /// No date cell, or one that matches no known encoding.
    UnparseableDate(String),
    /// Location is mandatory for this source and could not be resolved.
    LocationUnresolved(String),
    /// The row failed the source's row filter (wrong granularity etc.).
    Filtered,
}

impl fmt::Display for RowSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSkip::UnparseableDate(raw) if raw.is_empty() => write!(f, "no date cell"),
            RowSkip::UnparseableDate(raw) => write!(f, "unparseable date {:?}", raw),
            RowSkip::LocationUnresolved(raw) if raw.is_empty() => write!(f, "no location cell"),
            RowSkip::LocationUnresolved(raw) => write!(f, "unresolved location {:?}", raw),
            RowSkip::Filtered => write!(f, "filtered out"),
        }
    }
}
