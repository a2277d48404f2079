//! Configuration management for the guardwatch daemon.
//!
//! A single TOML file with one section per pipeline stage. Missing optional
//! sections fall back to the defaults in [`crate::constants`]. On first run
//! `load_or_create` writes the defaults next to the requested path.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{directory, pipeline, reputation};
use crate::error::AppError;
use crate::membership::Participation;
use crate::pipeline::PipelineConfig;
use crate::reputation::ReputationPolicy;
use crate::topology::ConfiguredTopology;

/// Upper bound of `directory.freshness_minutes` (one year)
const MAX_FRESHNESS_MINUTES: i64 = 365 * 24 * 60;

/// Get the platform-specific data directory for guardwatch
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        // Windows: %APPDATA%\guardwatch
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guardwatch")
    } else {
        // Linux/Mac: ~/.guardwatch
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".guardwatch")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface: String,
    /// Address/prefix pairs owned by `interface`, e.g. "192.168.1.20/24"
    #[serde(default)]
    pub local_networks: Vec<String>,
    /// Replay this legacy pcap file instead of a live interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_file: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_directory_url")]
    pub url: String,
    /// Empty means `<data dir>/guards.json`
    #[serde(default)]
    pub cache_file: String,
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: i64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// 0 keeps the startup snapshot for the whole run
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationConfig {
    #[serde(default = "default_trusted_report_every")]
    pub trusted_report_every: u64,
    #[serde(default = "default_untrusted_report_every")]
    pub untrusted_report_every: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_queue_capacity() -> usize {
    pipeline::PACKET_QUEUE_CAPACITY
}

fn default_directory_url() -> String {
    directory::GUARDS_URL.to_string()
}

fn default_freshness_minutes() -> i64 {
    directory::FRESHNESS_MINUTES
}

fn default_fetch_timeout_secs() -> u64 {
    directory::FETCH_TIMEOUT_SECS
}

fn default_trusted_report_every() -> u64 {
    reputation::TRUSTED_REPORT_EVERY
}

fn default_untrusted_report_every() -> u64 {
    reputation::UNTRUSTED_REPORT_EVERY
}

fn default_channel_capacity() -> usize {
    pipeline::EVENT_CHANNEL_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            local_networks: Vec::new(),
            pcap_file: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_directory_url(),
            cache_file: String::new(),
            freshness_minutes: default_freshness_minutes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            refresh_interval_secs: directory::REFRESH_INTERVAL_SECS,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            trusted_report_every: default_trusted_report_every(),
            untrusted_report_every: default_untrusted_report_every(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            directory: DirectoryConfig::default(),
            reputation: ReputationConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or writes and returns the defaults if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, AppError> {
        if path.exists() {
            return Self::load_from_file(path);
        }
        let config = Config::default();
        config.save_to_file(path)?;
        // Runs before the log subscriber exists
        println!("📝 Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), AppError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Rejects values the pipeline cannot run with. Called on every load.
    pub fn validate(&self) -> Result<(), AppError> {
        for network in &self.capture.local_networks {
            network
                .parse::<Participation>()
                .map_err(|e| AppError::Config(e.to_string()))?;
        }

        let positive = [
            ("capture.queue_capacity", self.capture.queue_capacity as u64),
            ("directory.fetch_timeout_secs", self.directory.fetch_timeout_secs),
            ("reputation.trusted_report_every", self.reputation.trusted_report_every),
            ("reputation.untrusted_report_every", self.reputation.untrusted_report_every),
            ("events.channel_capacity", self.events.channel_capacity as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{} must be greater than zero", name)));
        }
        if !(1..=MAX_FRESHNESS_MINUTES).contains(&self.directory.freshness_minutes) {
            return Err(AppError::Config(format!(
                "directory.freshness_minutes must be between 1 and {}",
                MAX_FRESHNESS_MINUTES
            )));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got \"{}\"",
                other
            ))),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        if self.directory.cache_file.is_empty() {
            get_data_dir().join(directory::CACHE_FILE_NAME)
        } else {
            PathBuf::from(&self.directory.cache_file)
        }
    }

    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.directory.freshness_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.fetch_timeout_secs)
    }

    /// `None` when the periodic refresher is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.directory.refresh_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn reputation_policy(&self) -> ReputationPolicy {
        ReputationPolicy {
            trusted_report_every: self.reputation.trusted_report_every,
            untrusted_report_every: self.reputation.untrusted_report_every,
        }
    }

    pub fn pipeline_config(&self, print_packets: bool) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.capture.queue_capacity,
            print_packets,
        }
    }

    pub fn topology(&self) -> ConfiguredTopology {
        ConfiguredTopology::new(
            self.capture.interface.clone(),
            self.capture.local_networks.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologySource;
    use tempfile::tempdir;

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("guardwatch.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, Config::default());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guardwatch.toml");
        fs::write(
            &path,
            r#"
[capture]
interface = "wlan0"
local_networks = ["192.168.1.20/24", "fd00:1::20/64"]
pcap_file = "/tmp/replay.pcap"
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.capture.interface, "wlan0");
        assert_eq!(config.capture.pcap_file.as_deref(), Some("/tmp/replay.pcap"));
        assert_eq!(config.capture.queue_capacity, 1000);
        assert_eq!(config.directory.url, directory::GUARDS_URL);
        assert_eq!(config.freshness(), chrono::Duration::minutes(30));
        assert_eq!(config.refresh_interval(), None);
        assert_eq!(config.reputation_policy(), ReputationPolicy::default());
        assert_eq!(config.events.channel_capacity, 10_000);

        let membership = config.topology().membership("wlan0").unwrap();
        assert_eq!(membership.participations().len(), 2);
    }

    #[test]
    fn test_rejects_bad_network() {
        let mut config = Config::default();
        config.capture.local_networks = vec!["192.168.1.300/24".to_string()];
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.capture.local_networks = vec!["192.168.1.20".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut config = Config::default();
        config.reputation.untrusted_report_every = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("reputation.untrusted_report_every"));

        let mut config = Config::default();
        config.directory.freshness_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.directory.freshness_minutes = 1_000_000_000_000;
        assert!(config.validate().is_err());
        config.directory.freshness_minutes = MAX_FRESHNESS_MINUTES;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.capture.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guardwatch.toml");
        fs::write(&path, "[capture\ninterface = ").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_cache_path() {
        let mut config = Config::default();
        assert!(config.cache_path().ends_with("guards.json"));
        config.directory.cache_file = "/var/lib/guardwatch/relays.json".to_string();
        assert_eq!(
            config.cache_path(),
            PathBuf::from("/var/lib/guardwatch/relays.json")
        );
    }

    #[test]
    fn test_freshness_never_panics() {
        let mut config = Config::default();
        config.directory.freshness_minutes = i64::MAX;
        assert_eq!(config.freshness(), chrono::Duration::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_interval_enabled() {
        let mut config = Config::default();
        config.directory.refresh_interval_secs = 900;
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(900)));
    }
}
