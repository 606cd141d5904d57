use std::{collections::BTreeMap, fs, path::Path};

use aqi_client::domain::{Placement, Reading, SensorRegistry};
use serde::Serialize;

use crate::sinks::{SeriesStorage, SeriesStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Last reading of one series, joined with registry metadata when the sensor
/// is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub reading: Reading,
    pub placement: Option<Placement>,
    pub location: Option<String>,
    pub name: Option<String>,
    pub site: Option<String>,
}

pub type Snapshot = BTreeMap<String, SnapshotEntry>;

/// Builds the snapshot from every stream present in storage.
///
/// Streams with no valid last record, or that cannot be read, are left out.
/// Registry sensors without a stream do not appear.
pub fn build_snapshot<B: SeriesStorage>(
    storage: &B,
    registry: &SensorRegistry,
) -> Result<Snapshot, SnapshotError> {
    let mut snapshot = Snapshot::new();

    for stream in storage.stream_ids()? {
        let store = SeriesStore::new(storage, stream.as_str());
        let reading = match store.last_record() {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                tracing::debug!(stream = %stream, "no valid record, omitting from snapshot");
                continue;
            }
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "failed to read series, omitting from snapshot");
                continue;
            }
        };

        let sensor = registry.get(&stream);
        if sensor.is_none() {
            tracing::debug!(stream = %stream, "series has no registry entry");
        }

        snapshot.insert(
            stream.clone(),
            SnapshotEntry {
                reading,
                placement: sensor.map(|s| s.placement),
                location: sensor.and_then(|s| s.location.clone()),
                name: sensor.and_then(|s| s.name.clone()),
                site: sensor.and_then(|s| s.site.clone()),
            },
        );
    }

    metrics::gauge!("aqi_snapshot_entries").set(snapshot.len() as f64);
    Ok(snapshot)
}

/// Loads registry metadata for the snapshot. A missing or unreadable
/// registry yields an empty one, so every entry is left unjoined.
pub fn registry_or_empty(path: &Path) -> SensorRegistry {
    match SensorRegistry::from_csv_path(path) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "sensor registry unavailable, snapshot will carry no metadata");
            SensorRegistry::default()
        }
    }
}

/// Serializes the snapshot as JSON, replacing any previous document.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    fs::write(path, json)?;
    Ok(())
}
