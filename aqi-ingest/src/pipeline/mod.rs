use std::{pin::Pin, sync::Arc, time::Duration};

use aqi_client::{
    api::{FetchError, HistoryFetcher, HistoryRequest},
    domain::{RawReading, Reading, Sensor, SensorRegistry},
};
use chrono_tz::Tz;
use futures::{future, Stream, StreamExt};

use crate::{
    config::ProfileConfig,
    sinks::{SeriesSink, SeriesStorage, SeriesStore, StoreError},
    sources::HistorySource,
    transform::ReadingNormalizer,
};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self { payload }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

/// A transform may drop an item by returning `Ok(None)`.
#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Option<Envelope<O>>, PipelineError>;
}

/// Consumes a stream and reports how many items were persisted.
#[async_trait::async_trait]
pub trait Sink<T>: Send {
    async fn run<S>(&mut self, input: S) -> Result<usize, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Chains a transform onto a stream, discarding dropped items.
pub fn through<I, O>(
    stream: EnvelopeStream<I>,
    transform: Arc<dyn Transform<I, O>>,
) -> EnvelopeStream<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let mapped = stream
        .then(move |item| {
            let t = transform.clone();
            async move {
                match item {
                    Ok(env) => t.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        })
        .filter_map(|res| future::ready(res.transpose()));
    Box::pin(mapped)
}

#[derive(Debug)]
pub enum SensorOutcome {
    Written(usize),
    FetchFailed(String),
    StoreFailed(String),
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sensors: Vec<(String, SensorOutcome)>,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.sensors
            .iter()
            .map(|(_, o)| match o {
                SensorOutcome::Written(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.sensors
            .iter()
            .filter(|(_, o)| !matches!(o, SensorOutcome::Written(_)))
            .count()
    }

    pub fn outcome(&self, sensor_id: &str) -> Option<&SensorOutcome> {
        self.sensors
            .iter()
            .find(|(id, _)| id == sensor_id)
            .map(|(_, o)| o)
    }
}

/// Fetch → normalize → append, one sensor at a time in registry order.
pub struct Pipeline<F, B> {
    pub fetcher: F,
    pub storage: B,
    pub registry: SensorRegistry,
    pub profile: ProfileConfig,
    pub tz: Tz,
    pub pause: Duration,
}

impl<F, B> Pipeline<F, B>
where
    F: HistoryFetcher,
    B: SeriesStorage + Send + Sync,
{
    pub async fn run(&self) -> RunSummary {
        self.run_at(chrono::Utc::now().timestamp()).await
    }

    /// Runs one cycle with the fetch window ending at `end_timestamp`.
    ///
    /// Per-sensor failures are logged and recorded; they never abort the run.
    pub async fn run_at(&self, end_timestamp: i64) -> RunSummary {
        let mut summary = RunSummary::default();

        for (i, sensor) in self.registry.iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            tracing::info!(sensor_id = %sensor.id, "fetching sensor history");
            let outcome = match self.ingest_sensor(sensor, end_timestamp).await {
                Ok(written) => {
                    if written == 0 {
                        tracing::info!(sensor_id = %sensor.id, "no new readings to write");
                    } else {
                        tracing::info!(sensor_id = %sensor.id, written, "appended readings");
                    }
                    SensorOutcome::Written(written)
                }
                Err(PipelineError::Fetch(e)) => {
                    metrics::counter!("aqi_fetch_failures_total").increment(1);
                    tracing::warn!(sensor_id = %sensor.id, error = %e, "fetch failed, skipping sensor this cycle");
                    SensorOutcome::FetchFailed(e.to_string())
                }
                Err(e) => {
                    metrics::counter!("aqi_store_errors_total").increment(1);
                    tracing::error!(sensor_id = %sensor.id, error = %e, "failed to persist readings");
                    SensorOutcome::StoreFailed(e.to_string())
                }
            };
            summary.sensors.push((sensor.id.clone(), outcome));
        }

        summary
    }

    pub fn request_for(&self, sensor: &Sensor, end_timestamp: i64) -> HistoryRequest {
        HistoryRequest {
            sensor_id: sensor.id.clone(),
            start_timestamp: end_timestamp - self.profile.lookback_secs(),
            end_timestamp,
            average_minutes: self.profile.average_minutes,
            fields: self.profile.request_fields(sensor.placement),
        }
    }

    async fn ingest_sensor(&self, sensor: &Sensor, end_timestamp: i64) -> Result<usize, PipelineError> {
        let request = self.request_for(sensor, end_timestamp);
        let response = self.fetcher.fetch(&request).await?;
        if response.is_empty() {
            tracing::info!(sensor_id = %sensor.id, "no valid data returned");
            return Ok(0);
        }

        let source = HistorySource::new(response);
        let normalizer: Arc<dyn Transform<RawReading, Reading>> =
            Arc::new(ReadingNormalizer::new(&self.profile, sensor.placement, self.tz));
        let stream = through(source.stream().await, normalizer);

        let mut sink = SeriesSink::new(SeriesStore::new(&self.storage, &sensor.id));
        sink.run(stream).await
    }
}
