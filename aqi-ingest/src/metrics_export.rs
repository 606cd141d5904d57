use std::{fs, io, path::Path};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder. Returns `None` if a recorder is
/// already installed.
pub fn install() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install Prometheus metrics recorder");
            None
        }
    }
}

/// Writes the current exposition text, replacing the file via a rename so
/// collectors never observe a partial write.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, handle.render())?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textfile_holds_rendered_metrics_and_no_temp_file() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("aqi_readings_written_total").increment(3);
        });

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("textfile").join("aqi_ingest.prom");

        write_textfile(&handle, &path).unwrap();
        write_textfile(&handle, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("aqi_readings_written_total 3"), "{text}");
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
