//! Orchestrator configuration.
//!
//! Settings come from, highest priority first:
//!
//! 1. `PRISM_TASKS_*` environment variables
//! 2. the `[orchestrator]` table of `.prism-tasks.toml`
//! 3. built-in defaults
//!
//! ```toml
//! [orchestrator]
//! poll_interval_ms = 500
//! max_poll_interval_ms = 5000
//! backoff_multiplier = 2.0
//! create_timeout_ms = 1800000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_POLL_INTERVAL_MS,
    DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, ENV_PREFIX,
};
use crate::poller::PollSchedule;
use crate::remote::Operation;

/// Polling cadence and per-operation deadlines.
///
/// # Defaults
///
/// | Setting                | Default   |
/// |------------------------|-----------|
/// | `poll_interval_ms`     | 1,000     |
/// | `max_poll_interval_ms` | 10,000    |
/// | `backoff_multiplier`   | 1.5       |
/// | `create_timeout_ms`    | 3,600,000 |
/// | `update_timeout_ms`    | 3,600,000 |
/// | `delete_timeout_ms`    | 3,600,000 |
///
/// # Examples
///
/// ```
/// use prism_tasks::OrchestratorConfig;
/// use std::time::Duration;
///
/// let config = OrchestratorConfig::default().with_poll_interval_ms(250);
/// assert_eq!(config.poll_schedule().delay_for(0), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay before the second status fetch.
    pub poll_interval_ms: u64,
    /// Ceiling for the backed-off delay.
    pub max_poll_interval_ms: u64,
    /// Delay growth factor per pending tick.
    pub backoff_multiplier: f64,
    /// Default deadline for creates.
    pub create_timeout_ms: u64,
    /// Default deadline for updates.
    pub update_timeout_ms: u64,
    /// Default deadline for deletes.
    pub delete_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            create_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            update_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            delete_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
        }
    }
}

impl OrchestratorConfig {
    /// Loads `.prism-tasks.toml` from the working directory if present, then
    /// applies environment overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads a specific file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, plus the errors of
    /// [`load`](Self::load).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses the `[orchestrator]` table of a TOML document. A missing table
    /// yields the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            orchestrator: OrchestratorConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.orchestrator)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by full variable name
    /// (e.g. `PRISM_TASKS_POLL_INTERVAL_MS`). Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = read("POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poll_interval_ms = v;
        }
        if let Some(v) = read("MAX_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.max_poll_interval_ms = v;
        }
        if let Some(v) = read("BACKOFF_MULTIPLIER").and_then(|v| v.parse().ok()) {
            self.backoff_multiplier = v;
        }
        if let Some(v) = read("CREATE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.create_timeout_ms = v;
        }
        if let Some(v) = read("UPDATE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.update_timeout_ms = v;
        }
        if let Some(v) = read("DELETE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.delete_timeout_ms = v;
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "max_poll_interval_ms ({}) is below poll_interval_ms ({})",
                self.max_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Sets the initial poll interval.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self.max_poll_interval_ms = self.max_poll_interval_ms.max(ms);
        self
    }

    /// Sets the poll interval ceiling.
    pub fn with_max_poll_interval_ms(mut self, ms: u64) -> Self {
        self.max_poll_interval_ms = ms;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the default deadline for one operation.
    pub fn with_timeout(mut self, operation: Operation, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match operation {
            Operation::Create => self.create_timeout_ms = ms,
            Operation::Update => self.update_timeout_ms = ms,
            Operation::Delete => self.delete_timeout_ms = ms,
        }
        self
    }

    /// The poll schedule these settings describe.
    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.max_poll_interval_ms),
            self.backoff_multiplier,
        )
    }

    /// Default deadline for `operation`.
    pub fn timeout_for(&self, operation: Operation) -> Duration {
        Duration::from_millis(match operation {
            Operation::Create => self.create_timeout_ms,
            Operation::Update => self.update_timeout_ms,
            Operation::Delete => self.delete_timeout_ms,
        })
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading the configuration file.
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },
    /// Parse error in the configuration.
    Parse(String),
    /// A value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => {
                write!(f, "Failed to read config file '{path}': {error}")
            },
            Self::Parse(e) => write!(f, "Failed to parse config: {e}"),
            Self::Invalid(e) => write!(f, "Invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_poll_interval_ms, 10_000);
        assert!((config.backoff_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            config.timeout_for(Operation::Delete),
            Duration::from_secs(60 * 60)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [orchestrator]
            poll_interval_ms = 200
            max_poll_interval_ms = 800
            update_timeout_ms = 120000

            [unrelated]
            key = "ignored"
        "#;

        let config = OrchestratorConfig::from_toml(toml).unwrap();
        assert_eq!(config.poll_interval_ms, 200);
        assert_eq!(config.max_poll_interval_ms, 800);
        assert_eq!(config.timeout_for(Operation::Update), Duration::from_secs(120));
        assert_eq!(config.create_timeout_ms, DEFAULT_OPERATION_TIMEOUT_MS);
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = OrchestratorConfig::from_toml("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_malformed_toml() {
        let err = OrchestratorConfig::from_toml("[orchestrator\npoll_interval_ms = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides_take_priority() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PRISM_TASKS_POLL_INTERVAL_MS", "50"),
            ("PRISM_TASKS_BACKOFF_MULTIPLIER", "2"),
            ("PRISM_TASKS_CREATE_TIMEOUT_MS", "not-a-number"),
        ]);
        let mut config = OrchestratorConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.poll_interval_ms, 50);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.create_timeout_ms, DEFAULT_OPERATION_TIMEOUT_MS);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let config = OrchestratorConfig::default().with_backoff_multiplier(0.5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = OrchestratorConfig::default()
            .with_poll_interval_ms(5_000)
            .with_max_poll_interval_ms(1_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_timeout() {
        let config =
            OrchestratorConfig::default().with_timeout(Operation::Create, Duration::from_secs(5));
        assert_eq!(config.timeout_for(Operation::Create), Duration::from_secs(5));
    }
}
