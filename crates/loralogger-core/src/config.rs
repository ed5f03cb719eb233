//! Configuration system for loralogger.
//!
//! Resolution order: explicit path → config file search → defaults, then
//! environment variable overrides on top.
//!
//! Config file search:
//!   1. $LORALOGGER_CONFIG (explicit override)
//!   2. ./loralogger.toml
//!   3. $XDG_CONFIG_HOME/loralogger/loralogger.toml
//!   4. /etc/loralogger/loralogger.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraLoggerConfig {
    pub general: GeneralConfig,
    pub collector: CollectorConfig,
    pub ttl_store: TtlStoreConfig,
    pub log_sink: LogSinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// tracing filter directive, e.g. "info" or "loraloggerd=debug".
    /// RUST_LOG takes precedence when set.
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// host:port on which packet-forwarder UDP datagrams are received.
    pub bind: String,
    /// SO_RCVBUF size in bytes. 0 = OS default.
    pub recv_buffer_bytes: usize,
    /// Max concurrent per-datagram tasks. 0 = unbounded, at most
    /// [`MAX_IN_FLIGHT`].
    pub max_in_flight: usize,
    /// How a failing sink affects the sinks after it.
    pub sink_policy: SinkPolicy,
}

/// Largest accepted `max_in_flight`; the permit limit of a tokio semaphore.
pub const MAX_IN_FLIGHT: usize = usize::MAX >> 3;

/// Ordering policy between persistence sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkPolicy {
    /// Stop at the first failing sink; later sinks never see the record.
    #[default]
    FailFast,
    /// Attempt every sink regardless of earlier failures.
    BestEffort,
}

/// Where the TTL store lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlBackend {
    /// Local SQLite file, purged by the daemon.
    #[default]
    Sqlite,
    /// AWS DynamoDB table with TTL enabled on `expires`.
    DynamoDb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlStoreConfig {
    pub enabled: bool,
    pub backend: TtlBackend,
    /// Table holding the raw captures.
    pub table: String,

    /// SQLite database file.
    pub path: PathBuf,
    /// How often expired SQLite items are deleted.
    pub purge_interval_secs: u64,

    /// AWS region of the DynamoDB table.
    pub region: String,
    /// Shared credentials file. Unset = the SDK's default lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    /// Profile within the credentials file. Unset = "default".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_profile: Option<String>,
    /// Endpoint override, e.g. DynamoDB Local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub enabled: bool,
    /// Day partitions are created below this directory as YYYY/MM/DD.
    pub root: PathBuf,
    pub file_name: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:1700".to_string(),
            recv_buffer_bytes: 0,
            max_in_flight: 0,
            sink_policy: SinkPolicy::FailFast,
        }
    }
}

impl Default for TtlStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: TtlBackend::Sqlite,
            table: "loralogger".to_string(),
            path: data_dir().join("raw.sqlite3"),
            purge_interval_secs: 3600,
            region: String::new(),
            credentials_path: None,
            credentials_profile: None,
            endpoint_url: None,
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("/var/log/loralogger"),
            file_name: "lora.log".to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("loralogger")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("loralogger")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LoraLoggerConfig {
    /// Load config: explicit path or search path → defaults, then env vars.
    ///
    /// Returns the config and the file it came from, if any. An explicit
    /// path that does not exist is an error; a fruitless search is not.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        let mut config = match &path {
            Some(p) => Self::from_file(p)?,
            None => LoraLoggerConfig::default(),
        };
        config.apply_env_overrides();
        Ok((config, path))
    }

    /// Parse a single config file, without env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Candidate config file locations, most specific first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(p) = std::env::var("LORALOGGER_CONFIG") {
            paths.push(PathBuf::from(p));
        }
        paths.push(PathBuf::from("loralogger.toml"));
        paths.push(config_dir().join("loralogger.toml"));
        paths.push(PathBuf::from("/etc/loralogger/loralogger.toml"));
        paths
    }

    /// Render as a TOML document.
    pub fn to_toml_pretty(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("collector.bind is empty".into()));
        }
        if self.collector.max_in_flight > MAX_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "collector.max_in_flight {} exceeds {MAX_IN_FLIGHT}",
                self.collector.max_in_flight
            )));
        }
        if !self.ttl_store.enabled && !self.log_sink.enabled {
            return Err(ConfigError::Invalid(
                "at least one of ttl_store and log_sink must be enabled".into(),
            ));
        }
        if self.ttl_store.enabled {
            self.ttl_store.validate()?;
        }
        if self.log_sink.enabled && self.log_sink.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid("log_sink.file_name is empty".into()));
        }
        Ok(())
    }

    /// Apply LORALOGGER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LORALOGGER_GENERAL__LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Ok(v) = std::env::var("LORALOGGER_COLLECTOR__BIND") {
            self.collector.bind = v;
        }
        if let Ok(v) = std::env::var("LORALOGGER_TTL_STORE__ENABLED") {
            self.ttl_store.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("LORALOGGER_TTL_STORE__REGION") {
            self.ttl_store.region = v;
        }
        if let Ok(v) = std::env::var("LORALOGGER_LOG_SINK__ROOT") {
            self.log_sink.root = PathBuf::from(v);
        }
    }
}

impl TtlStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            TtlBackend::Sqlite => {
                if !is_identifier(&self.table) {
                    return Err(ConfigError::Invalid(format!(
                        "ttl_store.table {:?} is not a plain identifier",
                        self.table
                    )));
                }
                if self.purge_interval_secs == 0 {
                    return Err(ConfigError::Invalid(
                        "ttl_store.purge_interval_secs must be positive".into(),
                    ));
                }
            }
            TtlBackend::DynamoDb => {
                if !is_dynamodb_table_name(&self.table) {
                    return Err(ConfigError::Invalid(format!(
                        "ttl_store.table {:?} is not a valid DynamoDB table name",
                        self.table
                    )));
                }
                if self.region.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "ttl_store.region is required for the dynamodb backend".into(),
                    ));
                }
                if self.credentials_profile.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    return Err(ConfigError::Invalid(
                        "ttl_store.credentials_profile is empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 3 to 255 of `[A-Za-z0-9_.-]`.
fn is_dynamodb_table_name(s: &str) -> bool {
    (3..=255).contains(&s.len())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// ASCII letter or underscore, then letters, digits and underscores.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
