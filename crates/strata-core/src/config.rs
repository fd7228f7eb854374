use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default worker poll cadence in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Default row threshold for inlining results into a notification body.
pub const DEFAULT_MAX_INLINE_ROWS: i64 = 100;

/// Top-level config (strata.toml + STRATA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the metadata SQLite database.
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
pub struct CacheConfig {
    /// Root directory for content-addressed result files.
    #[serde(default = "default_cache_dir")]
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between due-schedule polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// From-address stamped on queued report messages.
    #[serde(default = "default_mail_sender")]
    pub sender: String,
    /// Path to the outbox SQLite database. Notification is skipped with a
    /// warning when unset.
    pub outbox_path: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            sender: default_mail_sender(),
            outbox_path: None,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.strata/strata.db")
}

fn default_cache_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.strata/cache")
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_mail_sender() -> String {
    "strata@localhost".to_string()
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.strata/strata.toml")
}

impl StrataConfig {
    /// Load config from a TOML file with STRATA_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. STRATA_CONFIG env var
    ///   3. ~/.strata/strata.toml
    ///
    /// A missing file is not an error — defaults apply and env vars still
    /// override.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("STRATA_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("STRATA_").split("__"))
            .extract()
            .map_err(|e| crate::error::StrataError::Config(e.to_string()))
    }
}
