use std::{collections::BTreeMap, collections::HashMap, fmt};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Serialize, Serializer};

/// Name of the epoch-seconds column in sensor API history responses.
pub const TIMESTAMP_FIELD: &str = "time_stamp";

/// Core columns of a persisted series, in file order.
pub const SERIES_COLUMNS: [&str; 6] = [
    "timestamp",
    "local_datetime",
    "raw_concentration",
    "humidity",
    "corrected_concentration",
    "aqi",
];

/// One row of a history response, keyed by API field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    pub timestamp: Option<i64>,
    pub fields: HashMap<String, Option<f64>>,
}

impl RawReading {
    pub fn value(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied().flatten()
    }
}

/// EPA Air Quality Index for one reading.
///
/// `Passthrough` holds a negative concentration returned as-is by the
/// AQI mapping; `Undefined` covers missing or out-of-range input and is
/// rendered as `-`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aqi {
    Index(i32),
    Passthrough(f64),
    Undefined,
}

impl Aqi {
    pub fn index(&self) -> Option<i32> {
        match self {
            Aqi::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// Parses the persisted text form produced by `Display`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.parse::<i32>() {
            Ok(i) if i >= 0 => return Aqi::Index(i),
            Ok(i) => return Aqi::Passthrough(f64::from(i)),
            Err(_) => {}
        }
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Aqi::Passthrough(v),
            _ => Aqi::Undefined,
        }
    }
}

impl fmt::Display for Aqi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aqi::Index(i) => write!(f, "{i}"),
            Aqi::Passthrough(v) => write!(f, "{v}"),
            Aqi::Undefined => f.write_str("-"),
        }
    }
}

impl Serialize for Aqi {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Aqi::Index(i) => serializer.serialize_i32(*i),
            Aqi::Passthrough(v) => serializer.serialize_f64(*v),
            Aqi::Undefined => serializer.serialize_str("-"),
        }
    }
}

/// Normalized reading, the unit persisted in a sensor's series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: i64,
    pub local_datetime: DateTime<FixedOffset>,
    pub raw_concentration: Option<f64>,
    pub humidity: Option<f64>,
    pub corrected_concentration: Option<f64>,
    pub aqi: Aqi,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Option<f64>>,
}

impl Reading {
    /// RFC 3339 with whole seconds and a numeric offset, e.g. `2024-07-01T06:00:00-06:00`.
    pub fn local_datetime_text(&self) -> String {
        self.local_datetime
            .to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aqi_text_form_round_trips_each_variant() {
        for aqi in [
            Aqi::Index(42),
            Aqi::Passthrough(-2.87),
            Aqi::Passthrough(-5.0),
            Aqi::Undefined,
        ] {
            assert_eq!(Aqi::parse(&aqi.to_string()), aqi);
        }
        assert_eq!(Aqi::parse(""), Aqi::Undefined);
        assert_eq!(Aqi::parse("n/a"), Aqi::Undefined);
    }

    #[test]
    fn aqi_serializes_undefined_as_dash() {
        let json = serde_json::to_string(&vec![Aqi::Index(7), Aqi::Undefined]).unwrap();
        assert_eq!(json, r#"[7,"-"]"#);
    }

    #[test]
    fn raw_reading_value_flattens_missing() {
        let mut raw = RawReading::default();
        raw.fields.insert("humidity".to_string(), None);
        raw.fields.insert("pm2.5_atm".to_string(), Some(4.2));

        assert_eq!(raw.value("pm2.5_atm"), Some(4.2));
        assert_eq!(raw.value("humidity"), None);
        assert_eq!(raw.value("temperature"), None);
    }
}
