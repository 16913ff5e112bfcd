use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Top-level config (ingest.toml + INGEST_* env overrides).
///
/// Env keys separate sections with a double underscore so field names keep
/// their own: `INGEST_SCHEDULER__POLL_SECS=30`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll iterations (iteration start to iteration start).
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Dispatch due jobs of one iteration concurrently instead of in list order.
    #[serde(default)]
    pub concurrent: bool,
    /// Upper bound on simultaneously executing jobs in concurrent mode.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Reload each job's last run time from the history table at startup.
    #[serde(default = "bool_true")]
    pub restore_run_state: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: DEFAULT_POLL_SECS,
            concurrent: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            restore_run_state: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Path to the JSON schedule document.
    pub path: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_poll_secs() -> u64 {
    DEFAULT_POLL_SECS
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ingest/ingest.db", home)
}

impl IngestConfig {
    /// Load config from a TOML file with INGEST_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.ingest/ingest.toml
    ///
    /// A missing default file leaves the defaults in place. An explicit path
    /// that cannot be read is an [`IngestError::Io`](crate::error::IngestError::Io).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        if let Some(path) = config_path {
            std::fs::metadata(path)?;
        }
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::IngestError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(IngestConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("INGEST_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ingest/ingest.toml", home)
}
