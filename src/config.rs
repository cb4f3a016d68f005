use crate::retry::CallPolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Largest batch the Spotify append endpoint accepts.
pub const MAX_APPEND_BATCH: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Watermark: playlists and entries at or before this timestamp are skipped.
    /// Same unit as the timestamps in the source export.
    #[serde(default)]
    pub since: i64,
    /// Only sync these playlists (all when absent).
    #[serde(default)]
    pub playlists: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries_on_error: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Catalog ids starting with this prefix are store tracks, the rest are library tracks.
    #[serde(default = "default_store_id_prefix")]
    pub store_id_prefix: String,

    #[serde(default = "default_source_export_path")]
    pub source_export_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    /// Spotify user id to own created playlists; looked up via /me when empty.
    #[serde(default)]
    pub spotify_user: Option<String>,
}

fn default_batch_size() -> usize { MAX_APPEND_BATCH }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 1000 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_concurrent_requests() -> usize { 16 }
fn default_store_id_prefix() -> String { "T".into() }
fn default_source_export_path() -> PathBuf { "library-export.json".into() }
fn default_db_path() -> PathBuf { "/var/lib/playlist-migrate/playlist-migrate.db".into() }
fn default_log_dir() -> PathBuf { "/var/log/playlist-migrate".into() }

impl Default for Config {
    fn default() -> Self {
        Self {
            since: 0,
            playlists: None,
            exclude: Vec::new(),
            batch_size: default_batch_size(),
            max_retries_on_error: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
            store_id_prefix: default_store_id_prefix(),
            source_export_path: default_source_export_path(),
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            report_path: None,
            spotify_user: None,
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        if cfg.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if cfg.max_concurrent_requests == 0 {
            anyhow::bail!("max_concurrent_requests must be at least 1");
        }
        Ok(cfg)
    }

    /// Per-run sync parameters. Names given on the command line further restrict
    /// the configured playlist filter.
    pub fn sync_config(&self, cli_names: &[String]) -> SyncConfig {
        let configured: Option<HashSet<String>> =
            self.playlists.as_ref().map(|v| v.iter().cloned().collect());
        let name_filter = match (configured, cli_names.is_empty()) {
            (None, true) => None,
            (None, false) => Some(cli_names.iter().cloned().collect()),
            (Some(set), true) => Some(set),
            (Some(set), false) => Some(
                cli_names
                    .iter()
                    .filter(|n| set.contains(*n))
                    .cloned()
                    .collect(),
            ),
        };
        SyncConfig {
            since: self.since,
            name_filter,
            exclude: self.exclude.iter().cloned().collect(),
            batch_size: self.batch_size.clamp(1, MAX_APPEND_BATCH),
            store_id_prefix: self.store_id_prefix.clone(),
        }
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(
            self.max_retries_on_error,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_secs(self.request_timeout_secs),
            self.max_concurrent_requests,
        )
    }
}

/// Immutable parameters of a single sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub since: i64,
    pub name_filter: Option<HashSet<String>>,
    pub exclude: HashSet<String>,
    pub batch_size: usize,
    pub store_id_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Config::default().sync_config(&[])
    }
}
