//! Service Settings
//!
//! Loaded from an optional TOML file, then `VITALS__*` environment variables
//! (`VITALS__BUFFER__FLUSH_INTERVAL_SECS=10` sets `buffer.flush_interval_secs`).

use config::{Config, ConfigError, Environment, File, FileFormat};
use ingest_buffer::BufferConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use vitals_types::FamilyMembership;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
    pub storage: StorageSettings,
    pub buffer: BufferConfig,
    pub pipeline: PipelineConfig,
    pub escalation: SweepSettings,
    /// Memberships loaded into the in-memory backend at startup
    pub family: Vec<FamilyMembership>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Prometheus scrape address
    pub listen: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub sqlite_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_url: "sqlite://vitals.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Seconds between escalation sweeps
    pub interval_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Settings {
    /// Load settings from `path` (if given) and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(Environment::with_prefix("VITALS").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Parse settings from a TOML document, without environment overrides
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
