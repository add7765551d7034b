//! Environment variable parsing with type safety.
//!
//! Every getter takes the value resolved so far (default, config file or
//! flag) and returns it unchanged when the variable is unset or invalid.
//! Invalid values are collected so all issues can be reported at once.

use super::duration::parse_duration;
use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value} (use 300ms, 10s, 5m, 1h or seconds)")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for variables named `{prefix}{NAME}`.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Parser for bare names (`ADDRESS`, `KEY`, ...).
    pub fn unprefixed() -> Self {
        Self::new("")
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn lookup(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        env::var(&var_name).ok().map(|value| (var_name, value))
    }

    /// Whether the variable is set at all (even to an empty string).
    pub fn is_set(&self, name: &str) -> bool {
        env::var_os(self.var_name(name)).is_some()
    }

    pub fn get_string(&mut self, name: &str, fallback: impl Into<Sourced<String>>) -> Sourced<String> {
        match self.lookup(name) {
            Some((var_name, value)) => Sourced::from_env(value, var_name),
            None => fallback.into(),
        }
    }

    /// An empty variable clears the value.
    pub fn get_optional_string(
        &mut self,
        name: &str,
        fallback: impl Into<Sourced<Option<String>>>,
    ) -> Sourced<Option<String>> {
        match self.lookup(name) {
            Some((var_name, value)) if value.is_empty() => Sourced::from_env(None, var_name),
            Some((var_name, value)) => Sourced::from_env(Some(value), var_name),
            None => fallback.into(),
        }
    }

    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, fallback: impl Into<Sourced<bool>>) -> Sourced<bool> {
        let fallback = fallback.into();
        let Some((var_name, value)) = self.lookup(name) else {
            return fallback;
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Sourced::from_env(true, var_name),
            "0" | "false" | "no" | "off" | "" => Sourced::from_env(false, var_name),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                fallback
            }
        }
    }

    pub fn get_u64_range(
        &mut self,
        name: &str,
        fallback: impl Into<Sourced<u64>>,
        min: u64,
        max: u64,
    ) -> Sourced<u64> {
        let fallback = fallback.into();
        let Some((var_name, value)) = self.lookup(name) else {
            return fallback;
        };
        match value.trim().parse::<u64>() {
            Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                fallback
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 64-bit integer".to_string(),
                    value,
                });
                fallback
            }
        }
    }

    pub fn get_duration(
        &mut self,
        name: &str,
        fallback: impl Into<Sourced<Duration>>,
    ) -> Sourced<Duration> {
        let fallback = fallback.into();
        let Some((var_name, value)) = self.lookup(name) else {
            return fallback;
        };
        match parse_duration(&value) {
            Some(d) => Sourced::from_env(d, var_name),
            None => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var_name,
                    value,
                });
                fallback
            }
        }
    }

    /// An empty variable clears the path.
    pub fn get_optional_path(
        &mut self,
        name: &str,
        fallback: impl Into<Sourced<Option<PathBuf>>>,
    ) -> Sourced<Option<PathBuf>> {
        let fallback = fallback.into();
        match self.lookup(name) {
            Some((var_name, value)) if value.is_empty() => Sourced::from_env(None, var_name),
            Some((var_name, value)) => Sourced::from_env(Some(PathBuf::from(value)), var_name),
            None => fallback,
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let Some((var_name, value)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let lower = value.to_lowercase();
        match lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                Sourced::from_env(lower, var_name)
            }
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                Sourced::default_value(default.to_string())
            }
        }
    }

    /// Comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        match self.lookup(name) {
            Some((var_name, value)) => {
                let items: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Sourced::from_env(items, var_name)
            }
            None => Sourced::new(default, ConfigSource::Default),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::unprefixed()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::env;

    // Every test uses its own variable names; tests run in parallel.
    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: each test touches only its own variables
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: each test touches only its own variables
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_unset_keeps_fallback_and_source() {
        let vars = ["MQT_UNSET_ADDR"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new("MQT_");
        let flag = Sourced::new("127.0.0.1:9000".to_string(), ConfigSource::CommandLine);
        let result = parser.get_string("UNSET_ADDR", flag.clone());
        assert_eq!(result, flag);
    }

    #[test]
    fn test_env_overrides_flag() {
        let vars = ["MQT_ENV_ADDR"];
        cleanup_env(&vars);

        set_env("MQT_ENV_ADDR", "0.0.0.0:1");
        let mut parser = EnvParser::new("MQT_");
        let flag = Sourced::new("127.0.0.1:9000".to_string(), ConfigSource::CommandLine);
        let result = parser.get_string("ENV_ADDR", flag);
        assert_eq!(result.value, "0.0.0.0:1");
        assert_eq!(result.source, ConfigSource::Environment);
        assert_eq!(result.env_var.as_deref(), Some("MQT_ENV_ADDR"));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_values() {
        let vars = ["MQT_BOOL"];
        cleanup_env(&vars);

        for val in &["1", "true", "yes", "on", "TRUE", "Yes"] {
            set_env("MQT_BOOL", val);
            let mut parser = EnvParser::new("MQT_");
            assert!(parser.get_bool("BOOL", false).value, "Expected true for '{}'", val);
            assert!(!parser.has_errors());
        }
        for val in &["0", "false", "no", "off", "FALSE", ""] {
            set_env("MQT_BOOL", val);
            let mut parser = EnvParser::new("MQT_");
            assert!(!parser.get_bool("BOOL", true).value, "Expected false for '{}'", val);
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_invalid_keeps_fallback() {
        let vars = ["MQT_BAD_BOOL"];
        cleanup_env(&vars);

        set_env("MQT_BAD_BOOL", "maybe");
        let mut parser = EnvParser::new("MQT_");
        let result = parser.get_bool("BAD_BOOL", Sourced::new(true, ConfigSource::CommandLine));
        assert!(result.value);
        assert_eq!(result.source, ConfigSource::CommandLine);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_u64_range() {
        let vars = ["MQT_U64"];
        cleanup_env(&vars);

        set_env("MQT_U64", "50");
        let mut parser = EnvParser::new("MQT_");
        assert_eq!(parser.get_u64_range("U64", 10u64, 1, 100).value, 50);
        assert!(!parser.has_errors());

        set_env("MQT_U64", "200");
        let mut parser = EnvParser::new("MQT_");
        assert_eq!(parser.get_u64_range("U64", 10u64, 1, 100).value, 10);
        assert!(matches!(parser.errors()[0], EnvError::OutOfRange { .. }));

        set_env("MQT_U64", "ten");
        let mut parser = EnvParser::new("MQT_");
        assert_eq!(parser.get_u64_range("U64", 10u64, 1, 100).value, 10);
        assert!(matches!(parser.errors()[0], EnvError::InvalidValue { .. }));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_duration() {
        let vars = ["MQT_DUR"];
        cleanup_env(&vars);

        set_env("MQT_DUR", "15");
        let mut parser = EnvParser::new("MQT_");
        let result = parser.get_duration("DUR", Duration::from_secs(2));
        assert_eq!(result.value, Duration::from_secs(15));

        set_env("MQT_DUR", "fast");
        let mut parser = EnvParser::new("MQT_");
        let result = parser.get_duration("DUR", Duration::from_secs(2));
        assert_eq!(result.value, Duration::from_secs(2));
        assert_eq!(parser.take_errors().len(), 1);
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_empty_string_clears_optional_values() {
        let vars = ["MQT_OPT_KEY", "MQT_OPT_PATH"];
        cleanup_env(&vars);

        set_env("MQT_OPT_KEY", "");
        set_env("MQT_OPT_PATH", "");
        let mut parser = EnvParser::new("MQT_");
        let key = parser.get_optional_string(
            "OPT_KEY",
            Sourced::new(Some("flag".to_string()), ConfigSource::CommandLine),
        );
        assert_eq!(key.value, None);
        let path = parser.get_optional_path("OPT_PATH", Some(PathBuf::from("x.pem")));
        assert_eq!(path.value, None);

        set_env("MQT_OPT_PATH", "/etc/metriq/key.pem");
        let mut parser = EnvParser::new("MQT_");
        let path = parser.get_optional_path("OPT_PATH", None::<PathBuf>);
        assert_eq!(path.value, Some(PathBuf::from("/etc/metriq/key.pem")));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_log_level() {
        let vars = ["MQT_LEVEL"];
        cleanup_env(&vars);

        set_env("MQT_LEVEL", "DEBUG");
        let mut parser = EnvParser::new("MQT_");
        assert_eq!(parser.get_log_level("LEVEL", "info").value, "debug");

        set_env("MQT_LEVEL", "verbose");
        let mut parser = EnvParser::new("MQT_");
        assert_eq!(parser.get_log_level("LEVEL", "info").value, "info");
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_string_list() {
        let vars = ["MQT_LIST"];
        cleanup_env(&vars);

        set_env("MQT_LIST", "a, b,,c");
        let mut parser = EnvParser::new("MQT_");
        let result = parser.get_string_list("LIST", vec![]);
        assert_eq!(result.value, vec!["a", "b", "c"]);

        cleanup_env(&vars);
    }
}
