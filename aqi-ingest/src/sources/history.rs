use aqi_client::{api::HistoryResponse, domain::RawReading};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Replays one fetched history response as a stream of raw readings.
///
/// Rows are yielded in API order; ordering is imposed later by the series store.
pub struct HistorySource {
    response: HistoryResponse,
}

impl HistorySource {
    pub fn new(response: HistoryResponse) -> Self {
        Self { response }
    }
}

#[async_trait::async_trait]
impl Source<RawReading> for HistorySource {
    async fn stream(&self) -> EnvelopeStream<RawReading> {
        let readings: Vec<RawReading> = self.response.readings().collect();
        let s = async_stream::stream! {
            for raw in readings {
                yield Ok::<_, PipelineError>(Envelope::new(raw));
            }
        };

        Box::pin(s)
    }
}
