pub mod purpleair;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{RawReading, TIMESTAMP_FIELD};

pub use purpleair::PurpleAirClient;

/// One history query for a single sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub sensor_id: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub average_minutes: u32,
    pub fields: Vec<String>,
}

/// Columnar history payload: `data` rows are aligned to `fields`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("sensor api returned status {status}")]
    Status { status: u16 },
    #[error("sensor api request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch(&self, request: &HistoryRequest) -> Result<HistoryResponse, FetchError>;
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn value_as_timestamp(v: &Value) -> Option<i64> {
    let n = match v {
        Value::Number(n) => n,
        _ => return None,
    };
    if let Some(ts) = n.as_i64() {
        return Some(ts);
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

impl HistoryResponse {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() || self.data.is_empty()
    }

    /// Zips each data row with the field list. Short rows leave trailing
    /// fields out; non-numeric values become `None`.
    pub fn readings(&self) -> impl Iterator<Item = RawReading> + '_ {
        self.data.iter().map(move |row| {
            let mut raw = RawReading::default();
            for (name, value) in self.fields.iter().zip(row.iter()) {
                if name == TIMESTAMP_FIELD {
                    raw.timestamp = value_as_timestamp(value);
                } else {
                    raw.fields.insert(name.clone(), value_as_f64(value));
                }
            }
            raw
        })
    }
}
