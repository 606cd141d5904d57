use std::time::Duration;

use super::{FetchError, HistoryFetcher, HistoryRequest, HistoryResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.purpleair.com/v1";

/// HTTP client for the PurpleAir sensor history endpoint.
pub struct PurpleAirClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PurpleAirClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn history_url(&self, sensor_id: &str) -> String {
        format!(
            "{}/sensors/{}/history",
            self.base_url.trim_end_matches('/'),
            sensor_id
        )
    }
}

#[async_trait::async_trait]
impl HistoryFetcher for PurpleAirClient {
    async fn fetch(&self, request: &HistoryRequest) -> Result<HistoryResponse, FetchError> {
        let url = self.history_url(&request.sensor_id);
        tracing::debug!(%url, start = request.start_timestamp, end = request.end_timestamp, "requesting sensor history");

        let response = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .query(&[
                ("start_timestamp", request.start_timestamp.to_string()),
                ("end_timestamp", request.end_timestamp.to_string()),
                ("average", request.average_minutes.to_string()),
                ("fields", request.fields.join(",")),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<HistoryResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_url_tolerates_trailing_slash() {
        let client =
            PurpleAirClient::new("https://example.test/v1/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.history_url("1234"),
            "https://example.test/v1/sensors/1234/history"
        );
    }
}
