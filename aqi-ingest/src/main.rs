use anyhow::{Context, Result};
use aqi_client::{api::PurpleAirClient, domain::SensorRegistry};
use aqi_ingest::{
    config::AppConfig,
    metrics_export,
    observability,
    pipeline::Pipeline,
    sinks::DirStorage,
    snapshot,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;
    cfg.log_config();

    // A missing credential aborts before any sensor is processed.
    let api_key = cfg.api_key()?;

    let metrics = match &cfg.metrics {
        Some(_) => metrics_export::install(),
        None => None,
    };

    let registry = SensorRegistry::from_csv_path(&cfg.storage.sensors_file).with_context(|| {
        format!(
            "failed to load sensor registry {}",
            cfg.storage.sensors_file.display()
        )
    })?;
    tracing::info!(sensors = registry.len(), "sensor registry loaded");

    let fetcher = PurpleAirClient::new(&cfg.api.base_url, api_key.expose(), cfg.request_timeout())?;

    let pipeline = Pipeline {
        fetcher,
        storage: DirStorage::new(cfg.storage.data_dir.clone()),
        registry,
        profile: cfg.profile.clone(),
        tz: cfg.profile.tz()?,
        pause: cfg.pause(),
    };

    let summary = pipeline.run().await;
    tracing::info!(
        written = summary.written(),
        failed_sensors = summary.failed(),
        "ingest run complete"
    );

    if let Some(path) = &cfg.storage.snapshot_path {
        let snap = snapshot::build_snapshot(&pipeline.storage, &pipeline.registry)?;
        snapshot::write_snapshot(path, &snap)?;
        tracing::info!(entries = snap.len(), path = %path.display(), "snapshot written");
    }

    if let (Some(handle), Some(metrics_cfg)) = (&metrics, &cfg.metrics) {
        if let Err(e) = metrics_export::write_textfile(handle, &metrics_cfg.textfile_path) {
            tracing::warn!(error = %e, "failed to write metrics textfile");
        }
    }

    Ok(())
}
