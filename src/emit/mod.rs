use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ElasticConfig;
use crate::error::FileError;
use crate::row::CanonicalRecord;

/// Bulk-write destination for canonical records. Record id generation is
/// the sink's responsibility; the emitter only guarantees batching.
pub trait Sink {
    fn write_batch(&mut self, index: &str, records: &[CanonicalRecord]) -> Result<(), FileError>;
}

/// Buffers records and hands them to the sink in bounded batches: a flush
/// whenever the buffer reaches `max_batch`, plus one trailing flush for the
/// partial remainder. Order in equals order out, and a sink failure
/// surfaces immediately instead of being swallowed.
pub struct BatchEmitter<'a, S: Sink> {
    sink: &'a mut S,
    index: String,
    buf: Vec<CanonicalRecord>,
    max_batch: usize,
    batches: usize,
    records: u64,
}

impl<'a, S: Sink> BatchEmitter<'a, S> {
    pub fn new(sink: &'a mut S, index: &str, max_batch: usize) -> Self {
        let max_batch = max_batch.max(1);
        BatchEmitter {
            sink,
            index: index.to_string(),
            buf: Vec::with_capacity(max_batch),
            max_batch,
            batches: 0,
            records: 0,
        }
    }

    pub fn push(&mut self, record: CanonicalRecord) -> Result<(), FileError> {
        self.buf.push(record);
        if self.buf.len() >= self.max_batch {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FileError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.sink.write_batch(&self.index, &self.buf)?;
        self.batches += 1;
        self.records += self.buf.len() as u64;
        debug!(index = %self.index, batch = self.batches, len = self.buf.len(), "flushed batch");
        self.buf.clear();
        Ok(())
    }

    /// Flush the trailing partial batch and report (batches, records).
    pub fn finish(mut self) -> Result<(usize, u64), FileError> {
        self.flush()?;
        Ok((self.batches, self.records))
    }
}

/// Elasticsearch bulk sink: one `_bulk` request per batch, NDJSON body,
/// a fresh UUID per record.
pub struct ElasticSink {
    client: reqwest::blocking::Client,
    endpoint: String,
    auth: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
}

impl ElasticSink {
    pub fn new(config: &ElasticConfig) -> Result<ElasticSink> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("building sink HTTP client")?;
        let auth = match (&config.user, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        Ok(ElasticSink {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth,
        })
    }
}

impl Sink for ElasticSink {
    fn write_batch(&mut self, index: &str, records: &[CanonicalRecord]) -> Result<(), FileError> {
        let sink_err = |reason: String| FileError::Sink {
            len: records.len(),
            reason,
        };

        info!(index, len = records.len(), "bulk indexing");
        let mut body = String::new();
        for record in records {
            let action =
                serde_json::json!({ "index": { "_index": index, "_id": Uuid::new_v4() } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(record).map_err(|e| sink_err(e.to_string()))?);
            body.push('\n');
        }

        let mut request = self
            .client
            .post(format!("{}/_bulk", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        let response: BulkResponse = request
            .send()
            .map_err(|e| sink_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| sink_err(e.to_string()))?
            .json()
            .map_err(|e| sink_err(e.to_string()))?;

        if response.errors {
            return Err(sink_err("bulk response reported item errors".into()));
        }
        Ok(())
    }
}

/// In-memory sink for tests: records every flushed batch as-is.
#[cfg(test)]
pub(crate) struct MemorySink {
    pub batches: Vec<Vec<CanonicalRecord>>,
    pub fail: bool,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn new() -> Self {
        MemorySink {
            batches: Vec::new(),
            fail: false,
        }
    }
}

#[cfg(test)]
impl Sink for MemorySink {
    fn write_batch(&mut self, _index: &str, records: &[CanonicalRecord]) -> Result<(), FileError> {
        if self.fail {
            return Err(FileError::Sink {
                len: records.len(),
                reason: "memory sink told to fail".into(),
            });
        }
        self.batches.push(records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(n: i64) -> CanonicalRecord {
        let day = NaiveDate::from_ymd_opt(2021, 3, 15).unwrap();
        CanonicalRecord {
            date_start: day,
            date_end: day,
            location: None,
            location_name: None,
            iso_code2: None,
            iso_region2: None,
            cases: n,
            confirmed: n,
            deaths: 0,
            recovered: 0,
            vaccinated: 0,
            tested: 0,
            max_population: 0,
            percentage: None,
            filename: "emit.csv".into(),
        }
    }

    #[test]
    fn batches_are_bounded_and_ordered() {
        let mut sink = MemorySink::new();
        let mut emitter = BatchEmitter::new(&mut sink, "idx", 1000);
        for n in 0..2500 {
            emitter.push(record(n)).unwrap();
        }
        let (batches, records) = emitter.finish().unwrap();

        assert_eq!(batches, 3);
        assert_eq!(records, 2500);
        let sizes: Vec<usize> = sink.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        let replayed: Vec<i64> = sink.batches.iter().flatten().map(|r| r.cases).collect();
        assert_eq!(replayed, (0..2500).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_never_flushes() {
        let mut sink = MemorySink::new();
        let emitter = BatchEmitter::new(&mut sink, "idx", 1000);
        let (batches, records) = emitter.finish().unwrap();
        assert_eq!((batches, records), (0, 0));
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn exact_multiple_has_no_trailing_flush() {
        let mut sink = MemorySink::new();
        let mut emitter = BatchEmitter::new(&mut sink, "idx", 5);
        for n in 0..10 {
            emitter.push(record(n)).unwrap();
        }
        let (batches, _) = emitter.finish().unwrap();
        assert_eq!(batches, 2);
        assert_eq!(sink.batches.len(), 2);
    }

    #[test]
    fn sink_failure_propagates() {
        let mut sink = MemorySink::new();
        sink.fail = true;
        let mut emitter = BatchEmitter::new(&mut sink, "idx", 2);
        emitter.push(record(0)).unwrap();
        let err = emitter.push(record(1)).unwrap_err();
        assert!(matches!(err, FileError::Sink { len: 2, .. }));
    }
}
