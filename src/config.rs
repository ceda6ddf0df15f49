use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use tracing::trace;

use crate::duty::DutySchedule;
use crate::models::{FaultCenter, NoticeObject, ProbingRule, SilenceRule, Subscription};
use crate::notify::subscription::DEFAULT_CONCURRENCY;
use crate::senders::SmtpSettings;

/// Where the shared event cache lives
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheConfig {
    /// Process-local cache, only useful when rule evaluators run in-process
    #[default]
    Memory,

    /// Redis shared with the rule evaluators (needs the `redis-cache` feature)
    Redis { url: String },
}

/// History backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory history (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (older history rows are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Hours between two retention cleanups
        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./alerting.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

/// Configuration objects loaded into the config store at startup
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub fault_centers: Vec<FaultCenter>,
    #[serde(default)]
    pub notices: Vec<NoticeObject>,
    #[serde(default)]
    pub silences: Vec<SilenceRule>,
    #[serde(default)]
    pub probing_rules: Vec<ProbingRule>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub duty_rosters: Vec<DutySchedule>,

    /// Custom message templates by name, see `ChannelRoute::template_id`
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    /// History configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// SMTP relay for the email channel; email is disabled without it
    pub smtp: Option<SmtpSettings>,

    /// Maximum concurrent subscription sends per event
    #[serde(default = "default_subscription_concurrency")]
    pub subscription_concurrency: usize,

    #[serde(default)]
    pub seed: Seed,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            storage: None,
            smtp: None,
            subscription_concurrency: default_subscription_concurrency(),
            seed: Seed::default(),
        }
    }
}

fn default_subscription_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read configuration file {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided! ({e})"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
