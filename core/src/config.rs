use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Overrides;
use crate::services::storage::{default_data_file, MAX_BATCH_OPS};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;
/// Longest accepted retention window.
pub const MAX_RETENTION: Duration = Duration::from_secs(10 * 365 * DAY);

/// Retention windows of the age-based policies. Message and approval expiry
/// is stamped into each document's `expiresAt` by the writer instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionWindows {
    pub notifications: Duration,
    pub media: Duration,
    pub reactions: Duration,
    pub presence: Duration,
}

impl Default for RetentionWindows {
    fn default() -> Self {
        Self {
            notifications: Duration::from_secs(30 * DAY),
            media: Duration::from_secs(30 * DAY),
            reactions: Duration::from_secs(90 * DAY),
            presence: Duration::from_secs(DAY),
        }
    }
}

/// Tuning of the sweeper itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between scheduled sweeps.
    pub interval: Duration,
    /// Documents fetched and written per batch.
    pub batch_size: usize,
    /// Pause between consecutive batches of one task.
    pub batch_delay: Duration,
    /// Deadline for every individual store call.
    pub store_timeout: Duration,
    pub retention: RetentionWindows,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6 * HOUR),
            batch_size: 100,
            batch_delay: Duration::from_millis(100),
            store_timeout: Duration::from_secs(30),
            retention: RetentionWindows::default(),
        }
    }
}

impl SweeperConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_OPS).contains(&self.batch_size) {
            anyhow::bail!("invalid_batch_size: must be within 1..={MAX_BATCH_OPS}");
        }
        if self.interval.is_zero() {
            anyhow::bail!("invalid_interval: must be positive");
        }
        if self.store_timeout.is_zero() {
            anyhow::bail!("invalid_store_timeout: must be positive");
        }
        let retention = &self.retention;
        for (name, window) in [
            ("notification", retention.notifications),
            ("media", retention.media),
            ("reaction", retention.reactions),
            ("presence", retention.presence),
        ] {
            if window > MAX_RETENTION {
                anyhow::bail!(
                    "invalid_{name}_window: must not exceed {} days",
                    MAX_RETENTION.as_secs() / DAY
                );
            }
        }
        Ok(())
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    pub sweeper: SweeperConfig,
    /// Snapshot file of the bundled document store.
    pub data_file: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    sweep: FileSweep,
    #[serde(default)]
    retention: FileRetention,
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileSweep {
    interval_secs: Option<u64>,
    batch_size: Option<usize>,
    batch_delay_ms: Option<u64>,
    store_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileRetention {
    notification_days: Option<u64>,
    media_days: Option<u64>,
    reaction_days: Option<u64>,
    presence_hours: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileStore {
    data_file: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLogging {
    #[serde(default = "default_log_filter")]
    filter: String,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn span(value: u64, unit: u64, key: &str) -> Result<Duration> {
    value
        .checked_mul(unit)
        .map(Duration::from_secs)
        .with_context(|| format!("invalid_{key}: {value} is out of range"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Overrides) -> Result<Self> {
        let mut sweeper = SweeperConfig::default();
        let mut data_file = None;
        let mut log_filter = default_log_filter();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("SWEEPCORE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/sweepcore.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?;
            let FileSweep {
                interval_secs,
                batch_size,
                batch_delay_ms,
                store_timeout_secs,
            } = file_cfg.sweep;
            if let Some(secs) = interval_secs {
                sweeper.interval = Duration::from_secs(secs);
            }
            if let Some(size) = batch_size {
                sweeper.batch_size = size;
            }
            if let Some(ms) = batch_delay_ms {
                sweeper.batch_delay = Duration::from_millis(ms);
            }
            if let Some(secs) = store_timeout_secs {
                sweeper.store_timeout = Duration::from_secs(secs);
            }
            let retention = &mut sweeper.retention;
            if let Some(days) = file_cfg.retention.notification_days {
                retention.notifications = span(days, DAY, "notification_days")?;
            }
            if let Some(days) = file_cfg.retention.media_days {
                retention.media = span(days, DAY, "media_days")?;
            }
            if let Some(days) = file_cfg.retention.reaction_days {
                retention.reactions = span(days, DAY, "reaction_days")?;
            }
            if let Some(hours) = file_cfg.retention.presence_hours {
                retention.presence = span(hours, HOUR, "presence_hours")?;
            }
            data_file = file_cfg.store.data_file;
            log_filter = file_cfg.logging.filter;
        }

        // environment overrides
        if let Some(secs) = env_parse::<u64>("SWEEPCORE_INTERVAL_SECS") {
            sweeper.interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("SWEEPCORE_BATCH_SIZE") {
            sweeper.batch_size = size;
        }
        if let Ok(path) = std::env::var("SWEEPCORE_DATA_FILE") {
            data_file = Some(PathBuf::from(path));
        }
        if let Ok(filter) = std::env::var("SWEEPCORE_LOG") {
            log_filter = filter;
        }

        // CLI overrides
        if let Some(secs) = cli.interval_secs {
            sweeper.interval = Duration::from_secs(secs);
        }
        if let Some(size) = cli.batch_size {
            sweeper.batch_size = size;
        }
        if let Some(path) = &cli.data_file {
            data_file = Some(path.clone());
        }
        if let Some(filter) = &cli.log {
            log_filter = filter.clone();
        }

        sweeper.validate()?;

        Ok(Self {
            sweeper,
            data_file: data_file.unwrap_or_else(default_data_file),
            log_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "SWEEPCORE_CONFIG",
            "SWEEPCORE_INTERVAL_SECS",
            "SWEEPCORE_BATCH_SIZE",
            "SWEEPCORE_DATA_FILE",
            "SWEEPCORE_LOG",
        ] {
            std::env::remove_var(key);
        }
    }

    fn load_with(contents: &str, overrides: Overrides) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        Config::load(&Overrides {
            config: Some(path),
            ..overrides
        })
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_with(
            "[sweep]\ninterval_secs=60\nbatch_size=50\nbatch_delay_ms=0\n\
             [retention]\nreaction_days=10\npresence_hours=2\n\
             [store]\ndata_file=\"/tmp/s.json\"\n[logging]\nfilter=\"debug\"\n",
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.sweeper.interval, Duration::from_secs(60));
        assert_eq!(cfg.sweeper.batch_size, 50);
        assert!(cfg.sweeper.batch_delay.is_zero());
        assert_eq!(cfg.sweeper.retention.reactions, Duration::from_secs(10 * DAY));
        assert_eq!(cfg.sweeper.retention.presence, Duration::from_secs(2 * HOUR));
        assert_eq!(
            cfg.sweeper.retention.notifications,
            Duration::from_secs(30 * DAY)
        );
        assert_eq!(cfg.data_file, PathBuf::from("/tmp/s.json"));
        assert_eq!(cfg.log_filter, "debug");
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_with("", Overrides::default()).unwrap();
        assert_eq!(cfg.sweeper, SweeperConfig::default());
        assert_eq!(cfg.sweeper.interval, Duration::from_secs(6 * HOUR));
        assert_eq!(cfg.sweeper.batch_size, 100);
        assert_eq!(cfg.sweeper.batch_delay, Duration::from_millis(100));
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    #[serial]
    fn invalid_batch_size_fails() {
        clear_env();
        assert!(load_with("[sweep]\nbatch_size=0\n", Overrides::default()).is_err());
        assert!(load_with("[sweep]\nbatch_size=501\n", Overrides::default()).is_err());
    }

    #[test]
    #[serial]
    fn zero_interval_fails() {
        clear_env();
        assert!(load_with("[sweep]\ninterval_secs=0\n", Overrides::default()).is_err());
    }

    #[test]
    #[serial]
    fn absurd_retention_windows_fail() {
        clear_env();
        let err = load_with("[retention]\nnotification_days=365000000\n", Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("invalid_notification_window"), "{err}");
        let err = load_with(
            "[retention]\npresence_hours=9000000000000000\n",
            Overrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid_presence_hours"), "{err}");
        assert!(load_with("[retention]\nmedia_days=3650\n", Overrides::default()).is_ok());
    }

    #[test]
    fn validate_bounds_every_window() {
        let mut cfg = SweeperConfig::default();
        cfg.retention.reactions = MAX_RETENTION + Duration::from_secs(1);
        assert!(cfg.validate().is_err());
        cfg.retention.reactions = MAX_RETENTION;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[serial]
    fn unknown_keys_rejected() {
        clear_env();
        assert!(load_with("[sweep]\nbatch=5\n", Overrides::default()).is_err());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        std::env::set_var("SWEEPCORE_BATCH_SIZE", "20");
        std::env::set_var("SWEEPCORE_INTERVAL_SECS", "120");
        let cfg = load_with(
            "[sweep]\nbatch_size=10\ninterval_secs=60\n",
            Overrides {
                batch_size: Some(30),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.sweeper.batch_size, 30);
        assert_eq!(cfg.sweeper.interval, Duration::from_secs(120));
        clear_env();
    }
}
