//! Typed migration configuration, layered CLI > env > YAML file, with a
//! validate-and-clamp pass once every source is resolved.

use eyre::{eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "REDIS_MIGRATE_";

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: i64,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub connection: Duration,
    pub string: Duration,
    pub hash: Duration,
    pub list: Duration,
    pub set: Duration,
    pub sorted_set: Duration,
    pub default: Duration,
    pub large_data_threshold: usize,
    pub large_data_multiplier: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(30),
            string: Duration::from_secs(10),
            hash: Duration::from_secs(30),
            list: Duration::from_secs(30),
            set: Duration::from_secs(30),
            sorted_set: Duration::from_secs(30),
            default: Duration::from_secs(10),
            large_data_threshold: 1000,
            large_data_multiplier: 3.0,
        }
    }
}

impl TimeoutConfig {
    /// Per-operation deadline, scaled above the large-data threshold. The
    /// comparison is strict: a count exactly at the threshold still uses
    /// the unscaled base deadline.
    pub fn deadline_for(&self, kind: crate::store::Kind, element_count: usize) -> Duration {
        use crate::store::Kind::*;
        let base = match kind {
            String => self.string,
            Hash => self.hash,
            List => self.list,
            Set => self.set,
            SortedSet => self.sorted_set,
            None => self.default,
        };
        if kind == crate::store::Kind::None || element_count <= self.large_data_threshold {
            base
        } else {
            Duration::from_secs_f64(base.as_secs_f64() * self.large_data_multiplier)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(eyre!("invalid log level '{other}': expected debug, info, warn, error, or fatal")),
        }
    }

    pub fn as_env_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub max_concurrency: usize,
    pub progress_interval: Duration,
    pub verify: bool,
    pub continue_on_error: bool,
    pub resume_file: PathBuf,
    pub patterns: Vec<String>,
    pub timeouts: TimeoutConfig,
    pub log_level: LogLevel,
    pub dry_run: bool,
}

/// Values as they arrive from the CLI: everything optional so we can tell
/// "not provided" apart from "provided with the default value", which the
/// layered env/file/default resolution below depends on.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliOverrides {
    #[arg(long)]
    pub source_host: Option<String>,
    #[arg(long)]
    pub source_port: Option<u16>,
    #[arg(long)]
    pub source_password: Option<String>,
    #[arg(long)]
    pub source_db: Option<i64>,

    #[arg(long)]
    pub target_host: Option<String>,
    #[arg(long)]
    pub target_port: Option<u16>,
    #[arg(long)]
    pub target_password: Option<String>,
    #[arg(long)]
    pub target_db: Option<i64>,

    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub retry_attempts: Option<u32>,
    #[arg(long)]
    pub max_concurrency: Option<usize>,
    #[arg(long)]
    pub progress_interval: Option<u64>,
    #[arg(long)]
    pub verify: Option<bool>,
    #[arg(long)]
    pub continue_on_error: Option<bool>,
    #[arg(long)]
    pub resume_file: Option<PathBuf>,
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,

    #[arg(long)]
    pub connection_timeout: Option<u64>,
    #[arg(long)]
    pub string_timeout: Option<u64>,
    #[arg(long)]
    pub hash_timeout: Option<u64>,
    #[arg(long)]
    pub list_timeout: Option<u64>,
    #[arg(long)]
    pub set_timeout: Option<u64>,
    #[arg(long = "sorted-set-timeout")]
    pub sorted_set_timeout: Option<u64>,
    #[arg(long)]
    pub large_data_threshold: Option<usize>,
    #[arg(long)]
    pub large_data_multiplier: Option<f64>,

    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub dry_run: bool,

    /// Lowest-precedence YAML config file.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

/// Mirrors every CLI flag, loaded from a YAML document. All fields
/// optional; absent keys fall through to env then to the hardcoded
/// default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct FileConfig {
    source_host: Option<String>,
    source_port: Option<u16>,
    source_password: Option<String>,
    source_db: Option<i64>,
    target_host: Option<String>,
    target_port: Option<u16>,
    target_password: Option<String>,
    target_db: Option<i64>,
    batch_size: Option<usize>,
    retry_attempts: Option<u32>,
    max_concurrency: Option<usize>,
    progress_interval: Option<u64>,
    verify: Option<bool>,
    continue_on_error: Option<bool>,
    resume_file: Option<PathBuf>,
    patterns: Vec<String>,
    connection_timeout: Option<u64>,
    string_timeout: Option<u64>,
    hash_timeout: Option<u64>,
    list_timeout: Option<u64>,
    set_timeout: Option<u64>,
    sorted_set_timeout: Option<u64>,
    large_data_threshold: Option<usize>,
    large_data_multiplier: Option<f64>,
    log_level: Option<String>,
    dry_run: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read config file {}: {e}", path.display()))?;
        serde_yaml::from_str(&raw).map_err(|e| eyre!("failed to parse config file {}: {e}", path.display()))
    }
}

/// Resolves a value through CLI > env > file > default, in that order.
fn layered<T: Clone>(cli: Option<T>, env_key: &str, file: Option<T>, default: T, parse_env: impl Fn(&str) -> Option<T>) -> T {
    if let Some(v) = cli {
        return v;
    }
    if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}{env_key}")) {
        if let Some(v) = parse_env(&raw) {
            return v;
        }
    }
    file.unwrap_or(default)
}

impl MigrationConfig {
    pub fn resolve(cli: CliOverrides) -> Result<Self> {
        let file = match &cli.config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let source_host = layered(cli.source_host.clone(), "SOURCE_HOST", file.source_host.clone(), "127.0.0.1".to_string(), |s| Some(s.to_string()));
        let source_port = layered(cli.source_port, "SOURCE_PORT", file.source_port, 6379, |s| s.parse().ok());
        let source_password = cli.source_password.clone().or_else(|| std::env::var(format!("{ENV_PREFIX}SOURCE_PASSWORD")).ok()).or_else(|| file.source_password.clone());
        let source_db = layered(cli.source_db, "SOURCE_DB", file.source_db, 0, |s| s.parse().ok());

        let target_host = layered(cli.target_host.clone(), "TARGET_HOST", file.target_host.clone(), "127.0.0.1".to_string(), |s| Some(s.to_string()));
        let target_port = layered(cli.target_port, "TARGET_PORT", file.target_port, 6380, |s| s.parse().ok());
        let target_password = cli.target_password.clone().or_else(|| std::env::var(format!("{ENV_PREFIX}TARGET_PASSWORD")).ok()).or_else(|| file.target_password.clone());
        let target_db = layered(cli.target_db, "TARGET_DB", file.target_db, 0, |s| s.parse().ok());

        let batch_size = layered(cli.batch_size, "BATCH_SIZE", file.batch_size, 1000, |s| s.parse().ok());
        let retry_attempts = layered(cli.retry_attempts, "RETRY_ATTEMPTS", file.retry_attempts, 3, |s| s.parse().ok());
        let max_concurrency = layered(cli.max_concurrency, "MAX_CONCURRENCY", file.max_concurrency, 10, |s| s.parse().ok());
        let progress_interval_secs = layered(cli.progress_interval, "PROGRESS_INTERVAL", file.progress_interval, 5, |s| s.parse().ok());
        let verify = layered(cli.verify, "VERIFY", file.verify, true, |s| s.parse().ok());
        let continue_on_error = layered(cli.continue_on_error, "CONTINUE_ON_ERROR", file.continue_on_error, true, |s| s.parse().ok());
        let resume_file = layered(cli.resume_file.clone(), "RESUME_FILE", file.resume_file.clone(), PathBuf::from("migration_resume.json"), |s| Some(PathBuf::from(s)));

        let mut patterns = cli.patterns.clone();
        if patterns.is_empty() {
            if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}PATTERNS")) {
                patterns = raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
        }
        if patterns.is_empty() {
            patterns = file.patterns.clone();
        }

        let connection_timeout = layered(cli.connection_timeout, "CONNECTION_TIMEOUT", file.connection_timeout, 30, |s| s.parse().ok());
        let string_timeout = layered(cli.string_timeout, "STRING_TIMEOUT", file.string_timeout, 10, |s| s.parse().ok());
        let hash_timeout = layered(cli.hash_timeout, "HASH_TIMEOUT", file.hash_timeout, 30, |s| s.parse().ok());
        let list_timeout = layered(cli.list_timeout, "LIST_TIMEOUT", file.list_timeout, 30, |s| s.parse().ok());
        let set_timeout = layered(cli.set_timeout, "SET_TIMEOUT", file.set_timeout, 30, |s| s.parse().ok());
        let sorted_set_timeout = layered(cli.sorted_set_timeout, "SORTED_SET_TIMEOUT", file.sorted_set_timeout, 30, |s| s.parse().ok());
        let large_data_threshold = layered(cli.large_data_threshold, "LARGE_DATA_THRESHOLD", file.large_data_threshold, 1000, |s| s.parse().ok());
        let large_data_multiplier = layered(cli.large_data_multiplier, "LARGE_DATA_MULTIPLIER", file.large_data_multiplier, 3.0, |s| s.parse().ok());

        let log_level_raw = layered(cli.log_level.clone(), "LOG_LEVEL", file.log_level.clone(), "info".to_string(), |s| Some(s.to_string()));
        let log_level = LogLevel::parse(&log_level_raw)?;

        let dry_run = cli.dry_run || std::env::var(format!("{ENV_PREFIX}DRY_RUN")).map(|v| v == "true").unwrap_or(false) || file.dry_run.unwrap_or(false);

        if max_concurrency == 0 {
            return Err(eyre!("max concurrency must be > 0"));
        }
        if batch_size == 0 {
            return Err(eyre!("batch size must be > 0"));
        }
        if large_data_threshold == 0 {
            tracing::warn!("large-data-threshold is 0; every collection will be treated as large");
        }

        if source_host == target_host && source_port == target_port && source_db == target_db {
            tracing::warn!("source and target endpoints look identical; this will likely corrupt data");
        }

        Ok(Self {
            source: EndpointConfig {
                host: source_host,
                port: source_port,
                password: source_password,
                database: source_db,
            },
            target: EndpointConfig {
                host: target_host,
                port: target_port,
                password: target_password,
                database: target_db,
            },
            batch_size,
            retry_attempts,
            max_concurrency,
            progress_interval: Duration::from_secs(progress_interval_secs.max(1)),
            verify,
            continue_on_error,
            resume_file,
            patterns,
            timeouts: TimeoutConfig {
                connection: Duration::from_secs(connection_timeout.max(1)),
                string: Duration::from_secs(string_timeout.max(1)),
                hash: Duration::from_secs(hash_timeout.max(1)),
                list: Duration::from_secs(list_timeout.max(1)),
                set: Duration::from_secs(set_timeout.max(1)),
                sorted_set: Duration::from_secs(sorted_set_timeout.max(1)),
                default: Duration::from_secs(10),
                large_data_threshold,
                large_data_multiplier,
            },
            log_level,
            dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_provided() {
        let cfg = MigrationConfig::resolve(CliOverrides::default()).unwrap();
        assert_eq!(cfg.max_concurrency, 10);
        assert_eq!(cfg.batch_size, 1000);
        assert!(cfg.verify);
        assert!(cfg.continue_on_error);
        assert_eq!(cfg.resume_file, PathBuf::from("migration_resume.json"));
    }

    #[test]
    fn cli_override_wins_over_default() {
        let cli = CliOverrides {
            max_concurrency: Some(42),
            ..Default::default()
        };
        let cfg = MigrationConfig::resolve(cli).unwrap();
        assert_eq!(cfg.max_concurrency, 42);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let cli = CliOverrides {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(MigrationConfig::resolve(cli).is_err());
    }

    #[test]
    fn large_data_scaling_threshold_is_strict() {
        let cfg = MigrationConfig::resolve(CliOverrides::default()).unwrap();
        let at_threshold = cfg.timeouts.deadline_for(crate::store::Kind::List, cfg.timeouts.large_data_threshold);
        let above_threshold = cfg.timeouts.deadline_for(crate::store::Kind::List, cfg.timeouts.large_data_threshold + 1);
        assert_eq!(at_threshold, cfg.timeouts.list);
        assert_eq!(
            above_threshold,
            Duration::from_secs_f64(cfg.timeouts.list.as_secs_f64() * cfg.timeouts.large_data_multiplier)
        );
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let cli = CliOverrides {
            log_level: Some("yell".to_string()),
            ..Default::default()
        };
        assert!(MigrationConfig::resolve(cli).is_err());
    }
}
