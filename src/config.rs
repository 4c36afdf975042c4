//! Configuration types for Retrace

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::timing::Speed;
use crate::{Result, RetraceError};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Recorder settings
    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// Recorder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Replay pacing relative to the captured latency
    #[serde(default = "default_speed")]
    pub speed: Speed,
}

fn default_speed() -> Speed {
    Speed::Fastest
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetraceError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid TOML for this schema
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RetraceError::ConfigError(format!("Failed to parse config: {e}")))
    }
}

/// Shared, live view of the configuration.
///
/// The engine reads the speed once at the start of every replay, so
/// publishing a new config affects subsequent replays only.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Config>>,
}

impl ConfigHandle {
    /// Create a handle holding `config`
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (tx, _) = watch::channel(config);
        Self { tx: Arc::new(tx) }
    }

    /// Resolved replay speed
    #[must_use]
    pub fn speed(&self) -> Speed {
        self.tx.borrow().recorder.speed
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    /// Replace the whole configuration
    pub fn update(&self, config: Config) {
        self.tx.send_replace(config);
    }

    /// Change only the replay speed
    pub fn set_speed(&self, speed: Speed) {
        self.tx.send_modify(|config| config.recorder.speed = speed);
    }

    /// Watch for configuration changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            [recorder]
            speed = "lower"
        "#;

        let config = Config::from_toml(config_toml).unwrap();
        assert_eq!(config.recorder.speed, Speed::Lower);
    }

    #[test]
    fn test_default_speed_is_fastest() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.recorder.speed, Speed::Fastest);

        let config = Config::from_toml("[recorder]").unwrap();
        assert_eq!(config.recorder.speed, Speed::Fastest);
    }

    #[test]
    fn test_unrecognized_speed_means_original() {
        let config = Config::from_toml("[recorder]\nspeed = \"ludicrous\"").unwrap();
        assert_eq!(config.recorder.speed, Speed::Original);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[recorder]\nspeed = \"fast\"\n").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.recorder.speed, Speed::Fast);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Config::from_toml("[recorder]\nspeed = 3").is_err());
        assert!(Config::from_file(Path::new("/nonexistent/retrace.toml")).is_err());
    }

    #[test]
    fn test_handle_updates() {
        let handle = ConfigHandle::default();
        let mut rx = handle.subscribe();
        assert_eq!(handle.speed(), Speed::Fastest);

        handle.set_speed(Speed::Lowest);
        assert_eq!(handle.speed(), Speed::Lowest);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().recorder.speed, Speed::Lowest);

        handle.update(Config::default());
        assert_eq!(handle.current(), Config::default());
    }
}
