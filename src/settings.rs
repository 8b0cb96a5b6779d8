//! Plugin settings loaded from a `key=value` properties file.
//!
//! Malformed individual values are logged and replaced by defaults. The only
//! condition treated as fatal to the configuration is an unusable metrics
//! location, which marks the whole configuration invalid and disables the
//! dependent subsystem.

use crate::error::ConfigError;
use slog::{error, info, Logger};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub const METRICS_LOCATION_KEY: &str = "metrics-location";
pub const METRICS_LOCATION_DEFAULT: &str = "/tmp/rcaflow/metricsdb";
pub const DELETION_INTERVAL_KEY: &str = "metrics-deletion-interval";
pub const DELETION_INTERVAL_DEFAULT_MINUTES: u64 = 1;
const DELETION_INTERVAL_MIN_MINUTES: u64 = 1;
const DELETION_INTERVAL_MAX_MINUTES: u64 = 60;
pub const STATE_CHECK_INTERVAL_KEY: &str = "rca-state-check-interval-ms";
pub const STATE_CHECK_INTERVAL_DEFAULT_MS: u64 = 1000;
pub const RCA_CONF_DIR_KEY: &str = "rca-conf-dir";
pub const RCA_CONF_DIR_DEFAULT: &str = "rca_config";
pub const DB_FILE_CLEANUP_KEY: &str = "cleanup-metrics-db-files";

/// Tracks whether the loaded configuration is usable at all.
///
/// Set to invalid when a required resource (the metrics location) cannot be
/// established; readers degrade to "RCA not running" instead of crashing.
#[derive(Default)]
pub struct ConfigStatus {
    invalid: AtomicBool,
}

impl ConfigStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_invalid(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid.load(Ordering::Acquire)
    }
}

/// Parsed plugin settings with defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub metrics_location: PathBuf,
    pub metrics_deletion_interval_minutes: u64,
    pub state_check_interval_ms: u64,
    pub rca_conf_dir: PathBuf,
    pub cleanup_metrics_db_files: bool,
    raw: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metrics_location: PathBuf::from(METRICS_LOCATION_DEFAULT),
            metrics_deletion_interval_minutes: DELETION_INTERVAL_DEFAULT_MINUTES,
            state_check_interval_ms: STATE_CHECK_INTERVAL_DEFAULT_MS,
            rca_conf_dir: PathBuf::from(RCA_CONF_DIR_DEFAULT),
            cleanup_metrics_db_files: true,
            raw: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a properties file.
    ///
    /// A missing or unreadable file keeps every default and is not an error.
    /// An unusable metrics location marks `config_status` invalid.
    pub fn load(path: &Path, config_status: &ConfigStatus, logger: &Logger) -> Self {
        let mut settings = Settings::default();

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                settings.raw = parse_properties(&contents);
            }
            Err(e) => {
                error!(logger, "Loading settings file failed, using default values";
                    "path" => %path.display(),
                    "error" => %e
                );
                return settings;
            }
        }

        settings.load_metrics_location(logger, config_status);
        settings.load_deletion_interval(logger);
        settings.load_state_check_interval(logger);
        settings.load_rca_conf_dir();
        settings.load_cleanup_flag(logger);

        info!(logger, "Settings loaded";
            "metrics_location" => %settings.metrics_location.display(),
            "metrics_deletion_interval_minutes" => settings.metrics_deletion_interval_minutes,
            "state_check_interval_ms" => settings.state_check_interval_ms,
            "rca_conf_dir" => %settings.rca_conf_dir.display(),
            "cleanup_metrics_db_files" => settings.cleanup_metrics_db_files
        );
        settings
    }

    /// Raw string value of a setting, if present in the file.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn metrics_deletion_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.metrics_deletion_interval_minutes * 60)
    }

    fn load_metrics_location(&mut self, logger: &Logger, config_status: &ConfigStatus) {
        if let Some(value) = self.raw.get(METRICS_LOCATION_KEY).cloned() {
            self.metrics_location = PathBuf::from(value);
        } else {
            info!(logger, "No metrics-location configured, using default";
                "default" => METRICS_LOCATION_DEFAULT);
        }

        if let Err(e) = validate_or_create_dir(&self.metrics_location) {
            error!(logger, "Metrics location unusable, disabling RCA subsystem"; "error" => %e);
            config_status.set_invalid();
        }
    }

    fn load_deletion_interval(&mut self, logger: &Logger) {
        let Some(value) = self.raw.get(DELETION_INTERVAL_KEY).cloned() else {
            return;
        };
        match value.parse::<u64>() {
            Ok(minutes)
                if (DELETION_INTERVAL_MIN_MINUTES..=DELETION_INTERVAL_MAX_MINUTES)
                    .contains(&minutes) =>
            {
                self.metrics_deletion_interval_minutes = minutes;
            }
            Ok(minutes) => {
                error!(logger, "metrics-deletion-interval out of range, using default";
                    "value" => minutes,
                    "min" => DELETION_INTERVAL_MIN_MINUTES,
                    "max" => DELETION_INTERVAL_MAX_MINUTES,
                    "default" => self.metrics_deletion_interval_minutes
                );
            }
            Err(_) => {
                error!(logger, "Invalid metrics-deletion-interval, using default";
                    "value" => value.as_str(),
                    "default" => self.metrics_deletion_interval_minutes
                );
            }
        }
    }

    fn load_state_check_interval(&mut self, logger: &Logger) {
        let Some(value) = self.raw.get(STATE_CHECK_INTERVAL_KEY).cloned() else {
            return;
        };
        match value.parse::<u64>() {
            Ok(ms) if ms > 0 => self.state_check_interval_ms = ms,
            _ => {
                error!(logger, "Invalid rca-state-check-interval-ms, using default";
                    "value" => value.as_str(),
                    "default" => self.state_check_interval_ms
                );
            }
        }
    }

    fn load_rca_conf_dir(&mut self) {
        if let Some(value) = self.raw.get(RCA_CONF_DIR_KEY).cloned() {
            self.rca_conf_dir = PathBuf::from(value);
        }
    }

    fn load_cleanup_flag(&mut self, logger: &Logger) {
        let Some(value) = self.raw.get(DB_FILE_CLEANUP_KEY).cloned() else {
            return;
        };
        match value.trim().to_ascii_lowercase().parse::<bool>() {
            Ok(flag) => self.cleanup_metrics_db_files = flag,
            Err(_) => {
                // Safe default: always clean up on-disk db files.
                error!(logger, "Invalid cleanup-metrics-db-files, expected true/false";
                    "value" => value.as_str());
                self.cleanup_metrics_db_files = true;
            }
        }
    }
}

fn parse_properties(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

fn validate_or_create_dir(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        if std::fs::create_dir_all(path).is_err() {
            return Err(ConfigError::UnusableMetricsLocation { path: path.to_path_buf() });
        }
    }
    let usable = path.is_dir()
        && !std::fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
    if !usable {
        return Err(ConfigError::UnusableMetricsLocation { path: path.to_path_buf() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let status = ConfigStatus::new();
        let settings = Settings::load(
            Path::new("/nonexistent/rcaflow.properties"),
            &status,
            &test_logger(),
        );

        assert_eq!(settings.state_check_interval_ms, STATE_CHECK_INTERVAL_DEFAULT_MS);
        assert_eq!(
            settings.metrics_deletion_interval_minutes,
            DELETION_INTERVAL_DEFAULT_MINUTES
        );
        // A missing file never invalidates the configuration.
        assert!(status.is_valid());
    }

    #[test]
    fn test_values_parsed_and_range_checked() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = dir.path().join("metrics");
        let file = dir.path().join("rcaflow.properties");
        std::fs::write(
            &file,
            format!(
                "# comment\n\
                 metrics-location = {}\n\
                 metrics-deletion-interval = 120\n\
                 rca-state-check-interval-ms = 250\n\
                 cleanup-metrics-db-files = false\n",
                metrics.display()
            ),
        )
        .unwrap();

        let status = ConfigStatus::new();
        let settings = Settings::load(&file, &status, &test_logger());

        assert_eq!(settings.metrics_location, metrics);
        assert!(metrics.is_dir(), "metrics dir should have been created");
        // 120 is out of the 1-60 range: default kept
        assert_eq!(
            settings.metrics_deletion_interval_minutes,
            DELETION_INTERVAL_DEFAULT_MINUTES
        );
        assert_eq!(settings.state_check_interval_ms, 250);
        assert!(!settings.cleanup_metrics_db_files);
        assert!(status.is_valid());
    }

    #[test]
    fn test_unusable_metrics_location_invalidates_config() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected
        let bogus = dir.path().join("not-a-dir");
        std::fs::write(&bogus, "x").unwrap();

        let file = dir.path().join("rcaflow.properties");
        std::fs::write(&file, format!("metrics-location = {}\n", bogus.display())).unwrap();

        let status = ConfigStatus::new();
        let _settings = Settings::load(&file, &status, &test_logger());
        assert!(!status.is_valid());
    }
}
