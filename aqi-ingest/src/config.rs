use std::{env, fmt, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use aqi_client::{api::purpleair::DEFAULT_BASE_URL, domain::Placement};
use chrono_tz::Tz;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "AQI_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "aqi-ingest.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} environment variable not set")]
    MissingCredential(String),
    #[error("unknown timezone '{0}'")]
    Timezone(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            key_env: "PURPLEAIR_API_KEY".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub sensors_file: PathBuf,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sensors_file: PathBuf::from("sensors.csv"),
            snapshot_path: None,
        }
    }
}

/// Which raw fields to request and persist, and how to present timestamps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub indoor_field: String,
    pub outdoor_field: String,
    pub humidity_field: String,
    pub average_minutes: u32,
    pub lookback_minutes: u32,
    /// Additional raw fields persisted after the core columns of new series.
    pub extra_fields: Vec<String>,
    /// IANA zone used for `local_datetime`.
    pub timezone: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            indoor_field: "pm2.5_cf_1".to_string(),
            outdoor_field: "pm2.5_atm".to_string(),
            humidity_field: "humidity".to_string(),
            average_minutes: 10,
            lookback_minutes: 60,
            extra_fields: Vec::new(),
            timezone: "America/Denver".to_string(),
        }
    }
}

impl ProfileConfig {
    pub fn concentration_field(&self, placement: Placement) -> &str {
        match placement {
            Placement::Indoor => &self.indoor_field,
            Placement::Outdoor => &self.outdoor_field,
        }
    }

    /// Fields to request from the API for a sensor with this placement.
    pub fn request_fields(&self, placement: Placement) -> Vec<String> {
        let mut fields = vec![
            self.concentration_field(placement).to_string(),
            self.humidity_field.clone(),
        ];
        for extra in &self.extra_fields {
            if !fields.contains(extra) {
                fields.push(extra.clone());
            }
        }
        fields
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(&self.timezone).map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    pub fn lookback_secs(&self) -> i64 {
        i64::from(self.lookback_minutes) * 60
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pause between consecutive sensors.
    pub pause_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { pause_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus exposition file rewritten at the end of each run.
    pub textfile_path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub profile: ProfileConfig,
    pub run: RunConfig,
    pub metrics: Option<MetricsConfig>,
}

/// API credential. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

impl AppConfig {
    /// Loads from `$AQI_INGEST_CONFIG`, or `aqi-ingest.toml` if present,
    /// falling back to defaults when no file is named and none exists.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = env::var(CONFIG_ENV).ok();
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if explicit.is_none() && e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path, "no config file found, using defaults");
                let cfg = Self::default();
                cfg.profile.tz()?;
                Ok(cfg)
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.profile.tz()?;
        Ok(cfg)
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<ApiKey, ConfigError> {
        match env::var(&self.api.key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(ApiKey(key)),
            _ => Err(ConfigError::MissingCredential(self.api.key_env.clone())),
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.run.pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn log_config(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  api.base_url        : {}", self.api.base_url);
        tracing::info!("  api.key_env         : {}", self.api.key_env);
        tracing::info!("  storage.data_dir    : {}", self.storage.data_dir.display());
        tracing::info!("  storage.sensors_file: {}", self.storage.sensors_file.display());
        if let Some(path) = &self.storage.snapshot_path {
            tracing::info!("  storage.snapshot    : {}", path.display());
        }
        tracing::info!(
            "  profile             : indoor={} outdoor={} average={}m lookback={}m tz={}",
            self.profile.indoor_field,
            self.profile.outdoor_field,
            self.profile.average_minutes,
            self.profile.lookback_minutes,
            self.profile.timezone
        );
        if !self.profile.extra_fields.is_empty() {
            tracing::info!("  profile.extra_fields: {}", self.profile.extra_fields.join(","));
        }
        tracing::info!("  run.pause_ms        : {}", self.run.pause_ms);
    }
}
