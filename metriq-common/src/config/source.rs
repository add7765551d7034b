//! Configuration source tracking.
//!
//! Tracks where each configuration value came from so the binaries can log
//! the effective configuration at startup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a configuration value originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default value.
    Default,
    /// JSON file given with `-c/--config` or `CONFIG`.
    ConfigFile,
    /// Command-line flag.
    CommandLine,
    /// Environment variable (highest precedence).
    Environment,
}

impl ConfigSource {
    /// Get the precedence level (higher = takes priority).
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::ConfigFile => 1,
            ConfigSource::CommandLine => 2,
            ConfigSource::Environment => 3,
        }
    }

    /// Get a human-readable name for this source.
    pub fn display_name(&self) -> &'static str {
        match self {
            ConfigSource::Default => "default",
            ConfigSource::ConfigFile => "config file",
            ConfigSource::CommandLine => "command line",
            ConfigSource::Environment => "environment",
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A configuration value with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    /// The actual value.
    pub value: T,
    /// Where this value came from.
    pub source: ConfigSource,
    /// Environment variable name if the value came from the environment.
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self {
            value,
            source,
            env_var: None,
        }
    }

    pub fn from_env(value: T, var_name: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(var_name.into()),
        }
    }

    pub fn default_value(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    /// Map the value while preserving source.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
        }
    }

    /// Merge with another sourced value, taking the higher precedence one.
    pub fn merge(self, other: Self) -> Self {
        if other.source.precedence() >= self.source.precedence() {
            other
        } else {
            self
        }
    }

    /// Overlay an optional value from `source` (config file or flag).
    pub fn layer(self, value: Option<T>, source: ConfigSource) -> Self {
        match value {
            Some(value) => self.merge(Sourced::new(value, source)),
            None => self,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> From<T> for Sourced<T> {
    fn from(value: T) -> Self {
        Self::default_value(value)
    }
}

impl<T: Default> Default for Sourced<T> {
    fn default() -> Self {
        Self::default_value(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_beats_command_line() {
        assert!(ConfigSource::Environment.precedence() > ConfigSource::CommandLine.precedence());
        assert!(ConfigSource::CommandLine.precedence() > ConfigSource::ConfigFile.precedence());
        assert!(ConfigSource::Default.precedence() < ConfigSource::ConfigFile.precedence());
    }

    #[test]
    fn test_sourced_merge() {
        let flag = Sourced::new(10, ConfigSource::CommandLine);
        let env = Sourced::from_env(20, "POLL_INTERVAL");

        let merged = flag.clone().merge(env);
        assert_eq!(merged.value, 20);
        assert_eq!(merged.source, ConfigSource::Environment);

        let file = Sourced::new(30, ConfigSource::ConfigFile);
        assert_eq!(flag.merge(file).value, 10);
    }

    #[test]
    fn test_layer_skips_missing_values() {
        let value = Sourced::default_value("localhost:8080".to_string())
            .layer(Some("file:1".to_string()), ConfigSource::ConfigFile)
            .layer(None, ConfigSource::CommandLine);
        assert_eq!(value.value, "file:1");
        assert_eq!(value.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn test_layer_order_does_not_matter() {
        let value = Sourced::default_value(1)
            .layer(Some(3), ConfigSource::CommandLine)
            .layer(Some(2), ConfigSource::ConfigFile);
        assert_eq!(value.value, 3);
    }

    #[test]
    fn test_sourced_map() {
        let sourced = Sourced::from_env("42".to_string(), "RATE_LIMIT");
        let mapped = sourced.map(|s| s.parse::<i32>().unwrap());

        assert_eq!(mapped.value, 42);
        assert_eq!(mapped.source, ConfigSource::Environment);
        assert_eq!(mapped.env_var.as_deref(), Some("RATE_LIMIT"));
    }
}
