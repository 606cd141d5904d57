pub mod epa;

use aqi_client::domain::{Placement, RawReading, Reading, SERIES_COLUMNS};
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;

use crate::{
    config::ProfileConfig,
    pipeline::{Envelope, PipelineError, Transform},
};

pub use epa::{aqi_from_concentration, aqi_from_text, correct};

/// Converts epoch seconds into civil time in `tz`, honouring DST.
pub fn local_datetime(timestamp: i64, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let utc = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
    Some(utc.with_timezone(&tz).fixed_offset())
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round_ties_even() / 10.0
}

/// Turns raw API rows for one sensor into persisted readings.
#[derive(Debug, Clone)]
pub struct ReadingNormalizer {
    concentration_field: String,
    humidity_field: String,
    extra_fields: Vec<String>,
    tz: Tz,
}

impl ReadingNormalizer {
    pub fn new(profile: &ProfileConfig, placement: Placement, tz: Tz) -> Self {
        // Extras may not shadow a core column.
        let extra_fields = profile
            .extra_fields
            .iter()
            .filter(|f| !SERIES_COLUMNS.contains(&f.as_str()))
            .cloned()
            .collect();

        Self {
            concentration_field: profile.concentration_field(placement).to_string(),
            humidity_field: profile.humidity_field.clone(),
            extra_fields,
            tz,
        }
    }

    /// Returns `None` for rows without a usable timestamp.
    ///
    /// The AQI is derived from the unrounded corrected value; the stored
    /// corrected concentration is rounded to one decimal.
    pub fn normalize(&self, raw: &RawReading) -> Option<Reading> {
        let timestamp = raw.timestamp?;
        let local_datetime = local_datetime(timestamp, self.tz)?;

        let raw_concentration = raw.value(&self.concentration_field);
        let humidity = raw.value(&self.humidity_field);
        let corrected = correct(raw_concentration, humidity);
        let aqi = aqi_from_concentration(corrected);

        let extra = self
            .extra_fields
            .iter()
            .map(|f| (f.clone(), raw.value(f)))
            .collect();

        Some(Reading {
            timestamp,
            local_datetime,
            raw_concentration,
            humidity,
            corrected_concentration: corrected.map(round_tenth),
            aqi,
            extra,
        })
    }
}

#[async_trait::async_trait]
impl Transform<RawReading, Reading> for ReadingNormalizer {
    async fn apply(
        &self,
        input: Envelope<RawReading>,
    ) -> Result<Option<Envelope<Reading>>, PipelineError> {
        match self.normalize(&input.payload) {
            Some(reading) => Ok(Some(Envelope { payload: reading })),
            None => {
                metrics::counter!("aqi_readings_dropped_total").increment(1);
                tracing::debug!("dropping raw reading without a usable timestamp");
                Ok(None)
            }
        }
    }
}
