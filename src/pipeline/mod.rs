use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::SourceSpec;
use crate::emit::{BatchEmitter, Sink};
use crate::error::{FileError, RowSkip};
use crate::geo::LocationResolver;
use crate::row::RowAssembler;
use crate::sniff::{sniff_dialect, ColumnIndex, SAMPLE_WINDOW};

/// Per-file outcome. Drop counters are split by reason so a bad feed can
/// be diagnosed from the run summary without re-running.
#[derive(Debug, Default)]
pub struct FileStats {
    pub rows: u64,
    pub emitted: u64,
    pub batches: usize,
    pub dropped_date: u64,
    pub dropped_location: u64,
    pub filtered: u64,
}

/// Run one file through the pipeline: sniff the dialect, resolve the
/// header, assemble rows, emit bounded batches. Row-level failures are
/// counted and logged, never raised; anything returned as `Err` is
/// file-fatal and the caller moves on to the next file.
#[tracing::instrument(level = "info", skip_all, fields(file = %path.display(), source = %source.name))]
pub fn process_file<S: Sink>(
    path: &Path,
    source: &SourceSpec,
    resolver: &LocationResolver,
    sink: &mut S,
    max_batch: usize,
) -> Result<FileStats, FileError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let io_err = |source: std::io::Error| FileError::Io {
        file: file_name.clone(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let mut sample = Vec::with_capacity(SAMPLE_WINDOW);
    (&mut file)
        .take(SAMPLE_WINDOW as u64)
        .read_to_end(&mut sample)
        .map_err(io_err)?;
    let dialect = sniff_dialect(&sample, &file_name)?;
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut records = reader.records();
    let header = match records.next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect::<Vec<_>>(),
        Some(Err(source)) => {
            return Err(FileError::Csv {
                file: file_name.clone(),
                source,
            })
        }
        None => {
            return Err(FileError::DialectDetection {
                file: file_name.clone(),
                reason: "no header row".into(),
            })
        }
    };
    let index = ColumnIndex::resolve(source, &header, &file_name)?;

    let assembler = RowAssembler::new(source, &index, resolver, &file_name);
    let mut emitter = BatchEmitter::new(sink, &source.index, max_batch);
    let mut stats = FileStats::default();

    // header is row 1; data starts at ordinal 2
    for (ordinal, result) in records.enumerate().map(|(i, r)| (i + 2, r)) {
        let record = match result {
            Ok(record) => record,
            Err(source) => {
                return Err(FileError::Csv {
                    file: file_name.clone(),
                    source,
                })
            }
        };
        stats.rows += 1;
        match assembler.assemble(&record) {
            Ok(canonical) => {
                emitter.push(canonical)?;
                stats.emitted += 1;
            }
            Err(skip) => {
                debug!(row = ordinal, %skip, "dropping row");
                match skip {
                    RowSkip::UnparseableDate(_) => stats.dropped_date += 1,
                    RowSkip::LocationUnresolved(_) => stats.dropped_location += 1,
                    RowSkip::Filtered => stats.filtered += 1,
                }
            }
        }
    }

    let (batches, emitted) = emitter.finish()?;
    stats.batches = batches;
    debug_assert_eq!(emitted, stats.emitted);

    if stats.dropped_date + stats.dropped_location > 0 {
        warn!(
            rows = stats.rows,
            dropped_date = stats.dropped_date,
            dropped_location = stats.dropped_location,
            "file had invalid rows"
        );
    }
    info!(
        rows = stats.rows,
        emitted = stats.emitted,
        batches = stats.batches,
        filtered = stats.filtered,
        "file done"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_sources;
    use crate::emit::MemorySink;
    use crate::geo::testutil::StubGeocoder;
    use crate::geo::LookupTable;
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use tempfile::NamedTempFile;

    fn source(name: &str) -> SourceSpec {
        default_sources()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    fn write_file(content: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn owid_file_end_to_end() {
        let tmp = write_file(
            "date,location,new_cases,new_deaths,new_tests\n\
             2021-03-15,France,1200,30,50000\n\
             2021-03-16,France,,31,\n\
             not-a-date,France,10,0,0\n",
        );
        let stub = StubGeocoder::resolving(&[("France", 46.603354, 1.8883335, "FR")]);
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));
        let mut sink = MemorySink::new();

        let stats = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap();

        assert_eq!(stats.rows, 3);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.dropped_date, 1);
        assert_eq!(stats.batches, 1);

        let batch = &sink.batches[0];
        assert_eq!(batch[0].cases, 1200);
        assert_eq!(batch[0].deaths, 30);
        assert_eq!(batch[0].tested, 50000);
        assert_eq!(batch[0].iso_code2.as_deref(), Some("FR"));
        // empty numeric cell is not a validity failure
        assert_eq!(batch[1].cases, 0);
    }

    #[test]
    fn semicolon_dialect_is_inferred() {
        let tmp = write_file(
            "date;location;new_cases\n\
             2021-03-15;France;7\n",
        );
        let stub = StubGeocoder::resolving(&[("France", 46.6, 1.9, "FR")]);
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));
        let mut sink = MemorySink::new();

        let stats = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap();
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.batches[0][0].cases, 7);
    }

    #[test]
    fn malformed_header_emits_nothing() {
        let tmp = write_file(
            "jour,pays,valeur\n\
             2021-03-15,France,12\n",
        );
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(StubGeocoder::failing()));
        let mut sink = MemorySink::new();

        let err = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, FileError::HeaderResolution { field: "date", .. }));
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn empty_file_is_a_dialect_failure() {
        let tmp = write_file("");
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(StubGeocoder::failing()));
        let mut sink = MemorySink::new();

        let err = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, FileError::DialectDetection { .. }));
    }

    #[test]
    fn unresolvable_location_geocodes_once_across_duplicate_rows() {
        let tmp = write_file(
            "date,location,new_cases\n\
             2021-03-15,Atlantis,5\n\
             2021-03-16,Atlantis,6\n",
        );
        let stub = StubGeocoder::failing();
        let calls = stub.calls.clone();
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));
        let mut sink = MemorySink::new();

        let stats = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap();

        assert_eq!(stats.emitted, 0);
        assert_eq!(stats.dropped_location, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn row_filter_and_region_codes_flow_through() {
        let tmp = write_file(
            "date,granularite,maille_code,maille_nom,cas_confirmes,deces,gueris\n\
             2021-03-15,departement,DEP-75,Paris,1500,20,900\n\
             2021-03-15,pays,FRA,France,99999,999,9999\n",
        );
        let stub = StubGeocoder::resolving(&[("Paris", 48.8566, 2.3522, "FR")]);
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));
        let mut sink = MemorySink::new();

        let stats = process_file(
            tmp.path(),
            &source("opencovid19-fr"),
            &resolver,
            &mut sink,
            1000,
        )
        .unwrap();

        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.filtered, 1);
        let rec = &sink.batches[0][0];
        assert_eq!(rec.iso_region2.as_deref(), Some("FR-75"));
        assert_eq!(rec.confirmed, 1500);
        assert_eq!(rec.deaths, 20);
        assert_eq!(rec.recovered, 900);
    }

    #[test]
    fn sink_failure_is_file_fatal() {
        let tmp = write_file(
            "date,location,new_cases\n\
             2021-03-15,France,1\n\
             2021-03-16,France,2\n",
        );
        let stub = StubGeocoder::resolving(&[("France", 46.6, 1.9, "FR")]);
        let resolver = LocationResolver::new(LookupTable::new(), Box::new(stub));
        let mut sink = MemorySink::new();
        sink.fail = true;

        let err = process_file(
            tmp.path(),
            &source("contamination-owid"),
            &resolver,
            &mut sink,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, FileError::Sink { .. }));
    }
}
