use std::collections::{BTreeSet, HashSet};

use aqi_client::domain::{Aqi, Reading, SERIES_COLUMNS};
use chrono::{DateTime, FixedOffset};
use csv::{ByteRecord, StringRecord};
use futures::{Stream, StreamExt};

use super::storage::{SeriesStorage, StoreError};
use crate::pipeline::{Envelope, PipelineError, Sink};

/// Append-only, deduplicated series of readings for one sensor.
///
/// Every call re-reads the underlying stream; nothing is cached between calls.
pub struct SeriesStore<'a, B> {
    storage: &'a B,
    stream: String,
}

fn parse_optional_f64(s: &str) -> Option<f64> {
    if s.trim().is_empty() {
        None
    } else {
        s.trim().parse().ok()
    }
}

fn optional_text(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn field_text(r: &Reading, column: &str) -> String {
    match column {
        "timestamp" => r.timestamp.to_string(),
        "local_datetime" => r.local_datetime_text(),
        "raw_concentration" => optional_text(r.raw_concentration),
        "humidity" => optional_text(r.humidity),
        "corrected_concentration" => optional_text(r.corrected_concentration),
        "aqi" => r.aqi.to_string(),
        other => optional_text(r.extra.get(other).copied().flatten()),
    }
}

/// Header for a new stream: core columns, then any extras in name order.
fn columns_for(readings: &[Reading]) -> Vec<String> {
    let extras: BTreeSet<&String> = readings.iter().flat_map(|r| r.extra.keys()).collect();
    SERIES_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(extras.into_iter().cloned())
        .collect()
}

/// A persisted stream parsed leniently: rows are kept as raw bytes and short
/// rows are allowed.
struct ParsedSeries {
    headers: Vec<String>,
    rows: Vec<ByteRecord>,
}

impl ParsedSeries {
    fn parse(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes);
        let headers = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        let mut rows = Vec::new();
        for result in rdr.byte_records() {
            match result {
                Ok(record) => rows.push(record),
                Err(e) => tracing::debug!(error = %e, "skipping unreadable series row"),
            }
        }
        Ok(Self { headers, rows })
    }

    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|idx| record.get(idx))
    }

    /// Decodes only the timestamp column, so damage elsewhere in the row
    /// does not hide it from deduplication.
    fn timestamp_of(&self, record: &ByteRecord) -> Option<i64> {
        let idx = self.headers.iter().position(|h| h == "timestamp")?;
        std::str::from_utf8(record.get(idx)?).ok()?.trim().parse().ok()
    }

    fn timestamps(&self) -> HashSet<i64> {
        self.rows.iter().filter_map(|r| self.timestamp_of(r)).collect()
    }

    fn to_reading(&self, record: &StringRecord, local_datetime: DateTime<FixedOffset>) -> Reading {
        let number = |column: &str| self.get(record, column).and_then(parse_optional_f64);

        let extra = self
            .headers
            .iter()
            .filter(|h| !SERIES_COLUMNS.contains(&h.as_str()))
            .map(|h| (h.clone(), number(h.as_str())))
            .collect();

        Reading {
            timestamp: self
                .get(record, "timestamp")
                .and_then(|ts| ts.trim().parse().ok())
                .unwrap_or_else(|| local_datetime.timestamp()),
            local_datetime,
            raw_concentration: number("raw_concentration"),
            humidity: number("humidity"),
            corrected_concentration: number("corrected_concentration"),
            aqi: self
                .get(record, "aqi")
                .map(Aqi::parse)
                .unwrap_or(Aqi::Undefined),
            extra,
        }
    }

    /// Chronologically latest row with a parseable datetime; on ties the
    /// later row wins.
    fn last_record(&self) -> Option<Reading> {
        let mut latest: Option<(DateTime<FixedOffset>, StringRecord)> = None;
        for raw in &self.rows {
            let Ok(record) = StringRecord::from_byte_record(raw.clone()) else {
                tracing::debug!("skipping series row that is not valid UTF-8");
                continue;
            };
            let parsed = self
                .get(&record, "local_datetime")
                .and_then(|dt| DateTime::parse_from_rfc3339(dt.trim()).ok());
            let Some(dt) = parsed else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| dt >= *best) {
                latest = Some((dt, record));
            }
        }
        latest.map(|(dt, record)| self.to_reading(&record, dt))
    }
}

impl<'a, B: SeriesStorage> SeriesStore<'a, B> {
    pub fn new(storage: &'a B, stream: impl Into<String>) -> Self {
        Self {
            storage,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn load(&self) -> Result<Option<(Vec<u8>, ParsedSeries)>, StoreError> {
        match self.storage.load(&self.stream)? {
            Some(bytes) if !bytes.is_empty() => {
                let parsed = ParsedSeries::parse(&bytes)?;
                Ok(Some((bytes, parsed)))
            }
            _ => Ok(None),
        }
    }

    /// Timestamps already persisted; empty if the stream does not exist.
    pub fn existing_timestamps(&self) -> Result<HashSet<i64>, StoreError> {
        Ok(self
            .load()?
            .map(|(_, parsed)| parsed.timestamps())
            .unwrap_or_default())
    }

    /// Appends readings whose timestamps are not yet persisted, in ascending
    /// timestamp order, and returns how many rows were written.
    ///
    /// A new stream gets a header first. For an existing stream its header is
    /// authoritative: columns it lacks are not added.
    pub fn append(&self, readings: Vec<Reading>) -> Result<usize, StoreError> {
        let existing = self.load()?;
        let known = existing
            .as_ref()
            .map(|(_, parsed)| parsed.timestamps())
            .unwrap_or_default();

        let mut fresh: Vec<Reading> = readings
            .into_iter()
            .filter(|r| !known.contains(&r.timestamp))
            .collect();
        fresh.sort_by_key(|r| r.timestamp);
        fresh.dedup_by_key(|r| r.timestamp);
        if fresh.is_empty() {
            return Ok(0);
        }

        let (columns, write_header, out) = match existing {
            Some((bytes, parsed)) => {
                // Keep rows on their own line even if the file was edited by hand.
                let out = if bytes.last() == Some(&b'\n') { Vec::new() } else { vec![b'\n'] };
                (parsed.headers, false, out)
            }
            None => (columns_for(&fresh), true, Vec::new()),
        };

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(out);
        if write_header {
            wtr.write_record(&columns)?;
        }
        for r in &fresh {
            wtr.write_record(columns.iter().map(|c| field_text(r, c)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;

        self.storage.append(&self.stream, &bytes)?;
        Ok(fresh.len())
    }

    /// Chronologically last valid reading; rows whose datetime does not parse
    /// are ignored.
    pub fn last_record(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self.load()?.and_then(|(_, parsed)| parsed.last_record()))
    }
}

/// Pipeline sink that appends every normalized reading to one series.
pub struct SeriesSink<'a, B> {
    store: SeriesStore<'a, B>,
}

impl<'a, B: SeriesStorage> SeriesSink<'a, B> {
    pub fn new(store: SeriesStore<'a, B>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl<'a, B> Sink<Reading> for SeriesSink<'a, B>
where
    B: SeriesStorage + Sync,
{
    async fn run<S>(&mut self, mut input: S) -> Result<usize, PipelineError>
    where
        S: Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Reading> = Vec::new();

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => buffer.push(env.payload),
                Err(e) => {
                    tracing::error!(stream = %self.store.stream(), error = %e, "error in upstream pipeline for SeriesSink");
                }
            }
        }

        let written = self.store.append(buffer)?;
        metrics::counter!("aqi_readings_written_total").increment(written as u64);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::sinks::MemoryStorage;
    use aqi_client::api::FetchError;
    use crate::transform::local_datetime;

    const STREAM: &str = "1234";

    fn reading(ts: i64) -> Reading {
        Reading {
            timestamp: ts,
            local_datetime: local_datetime(ts, chrono_tz::America::Denver).unwrap(),
            raw_concentration: Some(10.0),
            humidity: Some(40.0),
            corrected_concentration: Some(7.5),
            aqi: Aqi::Index(31),
            extra: BTreeMap::new(),
        }
    }

    fn readings(ts: &[i64]) -> Vec<Reading> {
        ts.iter().copied().map(reading).collect()
    }

    fn persisted_timestamps(storage: &MemoryStorage) -> Vec<i64> {
        let bytes = storage.contents(STREAM).unwrap();
        let parsed = ParsedSeries::parse(&bytes).unwrap();
        parsed
            .rows
            .iter()
            .map(|r| parsed.timestamp_of(r).unwrap())
            .collect()
    }

    #[test]
    fn new_stream_gets_header_and_sorted_rows() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);

        assert!(store.existing_timestamps().unwrap().is_empty());
        assert_eq!(store.append(readings(&[300, 100, 200])).unwrap(), 3);

        let text = String::from_utf8(storage.contents(STREAM).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,local_datetime,raw_concentration,humidity,corrected_concentration,aqi")
        );
        assert_eq!(lines.next(), Some("100,1969-12-31T17:01:40-07:00,10,40,7.5,31"));
        assert_eq!(persisted_timestamps(&storage), vec![100, 200, 300]);
    }

    #[test]
    fn only_unseen_timestamps_are_written_in_order() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);
        store.append(readings(&[100, 200])).unwrap();

        let written = store.append(readings(&[250, 100, 150, 200])).unwrap();

        assert_eq!(written, 2);
        assert_eq!(persisted_timestamps(&storage), vec![100, 200, 150, 250]);
        assert_eq!(
            store.existing_timestamps().unwrap(),
            HashSet::from([100, 150, 200, 250])
        );
    }

    #[test]
    fn repeated_append_is_idempotent() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);
        let batch = readings(&[500, 400, 600]);

        assert_eq!(store.append(batch.clone()).unwrap(), 3);
        let after_first = storage.contents(STREAM).unwrap();

        assert_eq!(store.append(batch).unwrap(), 0);
        assert_eq!(storage.contents(STREAM).unwrap(), after_first);
    }

    #[test]
    fn duplicate_timestamps_within_a_batch_collapse() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);

        let mut batch = readings(&[100, 100, 200]);
        batch[1].raw_concentration = Some(99.0);
        assert_eq!(store.append(batch).unwrap(), 2);

        let last = store.last_record().unwrap().unwrap();
        assert_eq!(last.timestamp, 200);
        assert_eq!(persisted_timestamps(&storage), vec![100, 200]);
    }

    #[test]
    fn existing_header_is_authoritative() {
        let storage = MemoryStorage::new();
        storage.insert(STREAM, "timestamp,local_datetime,aqi\n100,1969-12-31T17:01:40-07:00,1");
        let store = SeriesStore::new(&storage, STREAM);

        let mut r = reading(200);
        r.extra.insert("temperature".to_string(), Some(70.0));
        assert_eq!(store.append(vec![r]).unwrap(), 1);

        let text = String::from_utf8(storage.contents(STREAM).unwrap()).unwrap();
        assert_eq!(
            text,
            "timestamp,local_datetime,aqi\n100,1969-12-31T17:01:40-07:00,1\n200,1969-12-31T17:03:20-07:00,31\n"
        );
    }

    #[test]
    fn extras_are_appended_after_core_columns_for_new_streams() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);

        let mut r = reading(100);
        r.extra.insert("temperature".to_string(), Some(70.5));
        r.extra.insert("pressure".to_string(), None);
        store.append(vec![r]).unwrap();

        let last = store.last_record().unwrap().unwrap();
        assert_eq!(last.extra.get("temperature"), Some(&Some(70.5)));
        assert_eq!(last.extra.get("pressure"), Some(&None));

        let text = String::from_utf8(storage.contents(STREAM).unwrap()).unwrap();
        assert!(text.starts_with("timestamp,local_datetime,raw_concentration,humidity,corrected_concentration,aqi,pressure,temperature\n"));
    }

    #[test]
    fn last_record_of_missing_or_empty_stream_is_none() {
        let storage = MemoryStorage::new();
        let store = SeriesStore::new(&storage, STREAM);
        assert!(store.last_record().unwrap().is_none());

        storage.insert(STREAM, "timestamp,local_datetime,aqi\n");
        assert!(store.last_record().unwrap().is_none());

        storage.insert(STREAM, "timestamp,local_datetime,aqi\n1,yesterday,5\n2,,6\n");
        assert!(store.last_record().unwrap().is_none());
    }

    #[test]
    fn last_record_skips_malformed_rows() {
        let storage = MemoryStorage::new();
        storage.insert(
            STREAM,
            "timestamp,local_datetime,raw_concentration,humidity,corrected_concentration,aqi\n\
             100,2024-01-15T05:00:00-07:00,10,40,7.5,31\n\
             200,not-a-date,11,41,8.0,33\n",
        );
        let store = SeriesStore::new(&storage, STREAM);

        let last = store.last_record().unwrap().unwrap();
        assert_eq!(last.timestamp, 100);
        assert_eq!(last.corrected_concentration, Some(7.5));
        assert_eq!(last.aqi, Aqi::Index(31));
    }

    #[test]
    fn last_record_is_chronological_not_positional() {
        let storage = MemoryStorage::new();
        storage.insert(
            STREAM,
            "timestamp,local_datetime,raw_concentration,humidity,corrected_concentration,aqi\n\
             200,1969-12-31T17:03:20-07:00,1,,,-\n\
             150,1969-12-31T17:02:30-07:00,2,,,-\n",
        );
        let store = SeriesStore::new(&storage, STREAM);

        let last = store.last_record().unwrap().unwrap();
        assert_eq!(last.timestamp, 200);
        assert_eq!(last.humidity, None);
        assert_eq!(last.aqi, Aqi::Undefined);
    }

    #[test]
    fn damaged_row_still_counts_for_dedup() {
        let storage = MemoryStorage::new();
        storage.insert(
            STREAM,
            b"timestamp,local_datetime,raw_concentration,humidity,corrected_concentration,aqi\n\
              100,2024-01-15T05:00:00-07:00,10,40,7.5,31\n\
              200,2024-01-15T05:10:00-07:00,1\xff,40,7.5,31\n"
                .to_vec(),
        );
        let store = SeriesStore::new(&storage, STREAM);

        assert_eq!(store.existing_timestamps().unwrap(), HashSet::from([100, 200]));
        assert_eq!(store.append(vec![reading(200)]).unwrap(), 0);
        assert_eq!(persisted_timestamps(&storage), vec![100, 200]);

        // the damaged row is unusable as a record, so the earlier one is latest
        assert_eq!(store.last_record().unwrap().unwrap().timestamp, 100);
    }

    #[tokio::test]
    async fn sink_appends_stream_and_counts_rows() {
        let storage = MemoryStorage::new();
        let mut sink = SeriesSink::new(SeriesStore::new(&storage, STREAM));

        let items: Vec<Result<Envelope<Reading>, PipelineError>> = vec![
            Ok(Envelope::new(reading(2))),
            Err(PipelineError::Fetch(FetchError::Status { status: 500 })),
            Ok(Envelope::new(reading(1))),
        ];
        let written = sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(persisted_timestamps(&storage), vec![1, 2]);
    }
}
