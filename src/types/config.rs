//! Configuration structures.
//!
//! Configuration is loaded from a JSON file (path given directly or through
//! `OFFICE_CONFIG`) and falls back to defaults for every omitted section.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "OFFICE_CONFIG";

/// Global office configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Teams started with the office.
    #[serde(default)]
    pub teams: Vec<TeamConfig>,

    /// Default scheduling limits.
    #[serde(default)]
    pub defaults: DefaultLimits,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse configuration from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Load from the file named by `OFFICE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Check structural constraints on the team layout.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for team in &self.teams {
            team.validate()?;
            if !seen.insert(team.name.as_str()) {
                return Err(Error::configuration(format!(
                    "duplicate team name: {}",
                    team.name
                )));
            }
        }
        Ok(())
    }
}

/// Team configuration: name → worker count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamConfig {
    /// Team name referenced by job definitions.
    pub name: String,

    /// Number of worker threads (1..N).
    pub workers: usize,

    /// Bounded dequeue wait for this team. Falls back to `defaults.poll_interval`.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
}

impl TeamConfig {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            poll_interval: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("team name cannot be empty"));
        }
        if self.workers == 0 {
            return Err(Error::configuration(format!(
                "team {} must have at least one worker",
                self.name
            )));
        }
        Ok(())
    }
}

/// Default scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultLimits {
    /// How long an idle worker waits on its queue before re-checking liveness.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long shutdown waits for workers to finish their current job.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum consecutive repeats of one job instance (0 = unlimited).
    pub max_repeats: u64,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            max_repeats: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_json_str("{}").unwrap();
        assert!(config.teams.is_empty());
        assert_eq!(config.defaults.poll_interval, Duration::from_millis(100));
        assert_eq!(config.defaults.max_repeats, 0);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_parses_humantime_intervals() {
        let config = Config::from_json_str(
            r#"{
                "teams": [
                    {"name": "io", "workers": 2, "poll_interval": "25ms"},
                    {"name": "cpu", "workers": 4}
                ],
                "defaults": {"shutdown_timeout": "2s"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.teams.len(), 2);
        assert_eq!(config.teams[0].poll_interval, Some(Duration::from_millis(25)));
        assert_eq!(config.teams[1].poll_interval, None);
        assert_eq!(config.defaults.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_json_str(r#"{"teams": [{"name": "a", "workers": 0}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duplicate_team_rejected() {
        let mut config = Config::default();
        config.teams.push(TeamConfig::new("a", 1));
        config.teams.push(TeamConfig::new("a", 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"teams": [{{"name": "main", "workers": 3}}]}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.teams, vec![TeamConfig::new("main", 3)]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/office.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
