use std::{collections::HashMap, fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

/// Where a sensor is mounted. Selects which raw particulate field is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Indoor,
    Outdoor,
}

impl Placement {
    /// Anything other than "Indoor" (case-insensitive) counts as outdoor,
    /// including a missing location.
    pub fn from_location(location: Option<&str>) -> Self {
        match location {
            Some(l) if l.trim().eq_ignore_ascii_case("indoor") => Placement::Indoor,
            _ => Placement::Outdoor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub id: String,
    pub placement: Placement,
    pub location: Option<String>,
    pub name: Option<String>,
    pub site: Option<String>,
}

impl Sensor {
    pub fn new(id: impl Into<String>, placement: Placement) -> Self {
        Self {
            id: id.into(),
            placement,
            location: None,
            name: None,
            site: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("failed to open sensor registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read sensor registry: {0}")]
    Csv(#[from] csv::Error),
}

/// Registry CSV row. Only `ID` is required.
#[derive(Deserialize)]
struct RegistryRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Location", default)]
    location: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Site", default)]
    site: Option<String>,
}

impl From<RegistryRow> for Sensor {
    fn from(row: RegistryRow) -> Self {
        Sensor {
            placement: Placement::from_location(row.location.as_deref()),
            id: row.id,
            location: row.location,
            name: row.name,
            site: row.site,
        }
    }
}

/// Lookup table of known sensors, kept in registry order.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
    index: HashMap<String, usize>,
}

impl SensorRegistry {
    /// Builds a registry, keeping the first sensor seen for any repeated id.
    pub fn new(sensors: impl IntoIterator<Item = Sensor>) -> Self {
        let mut registry = Self::default();
        for sensor in sensors {
            if registry.index.contains_key(&sensor.id) {
                tracing::warn!(sensor_id = %sensor.id, "duplicate sensor id in registry, keeping first");
                continue;
            }
            registry.index.insert(sensor.id.clone(), registry.sensors.len());
            registry.sensors.push(sensor);
        }
        registry
    }

    /// Reads a registry from CSV with header columns `ID`, `Location`, `Name`, `Site`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RegistryError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut sensors = Vec::new();
        for row in rdr.deserialize::<RegistryRow>() {
            let row = row?;
            if row.id.is_empty() {
                tracing::warn!("skipping registry row without an ID");
                continue;
            }
            sensors.push(Sensor::from(row));
        }
        Ok(Self::new(sensors))
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn get(&self, id: &str) -> Option<&Sensor> {
        self.index.get(id).map(|&idx| &self.sensors[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_parses_placement_and_optional_columns() {
        let csv = "ID,Location,Name\n1234,Indoor,Kitchen\n5678,Outdoor,\n91011,,Roof\n";
        let registry = SensorRegistry::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(registry.len(), 3);
        let kitchen = registry.get("1234").unwrap();
        assert_eq!(kitchen.placement, Placement::Indoor);
        assert_eq!(kitchen.name.as_deref(), Some("Kitchen"));
        assert!(kitchen.site.is_none());

        let yard = registry.get("5678").unwrap();
        assert_eq!(yard.placement, Placement::Outdoor);
        assert!(yard.name.is_none());

        // No location at all falls back to outdoor.
        assert_eq!(registry.get("91011").unwrap().placement, Placement::Outdoor);
    }

    #[test]
    fn registry_keeps_first_duplicate_and_order() {
        let csv = "ID,Location\n2, indoor \n1,Outdoor\n2,Outdoor\n";
        let registry = SensorRegistry::from_reader(csv.as_bytes()).unwrap();

        let ids: Vec<&str> = registry.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(registry.get("2").unwrap().placement, Placement::Indoor);
    }

    #[test]
    fn registry_requires_id_column() {
        let csv = "Location\nIndoor\n";
        assert!(matches!(
            SensorRegistry::from_reader(csv.as_bytes()),
            Err(RegistryError::Csv(_))
        ));
    }

    #[test]
    fn unknown_sensor_lookup_is_none() {
        let registry = SensorRegistry::new(vec![Sensor::new("1", Placement::Outdoor)]);
        assert!(registry.get("2").is_none());
        assert!(!registry.is_empty());
    }
}
