use std::{env, path::PathBuf};

use anyhow::{bail, Result};
use aqi_ingest::{config::AppConfig, observability, sinks::DirStorage, snapshot};

/// Rebuilds the latest-reading snapshot from the series already on disk,
/// without contacting the sensor API.
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    // An explicit output path wins over the configured one.
    let path = match env::args().nth(1).map(PathBuf::from).or_else(|| cfg.storage.snapshot_path.clone()) {
        Some(path) => path,
        None => bail!("usage: build_snapshot <output_json_path> (or set storage.snapshot_path)"),
    };

    let registry = snapshot::registry_or_empty(&cfg.storage.sensors_file);

    let storage = DirStorage::new(cfg.storage.data_dir.clone());
    let snap = snapshot::build_snapshot(&storage, &registry)?;
    snapshot::write_snapshot(&path, &snap)?;

    tracing::info!(entries = snap.len(), path = %path.display(), "snapshot recomputed");

    Ok(())
}
