//! Configuration plumbing shared by the agent and the collector.
//!
//! Values are layered: built-in defaults, then an optional JSON config file,
//! then command-line flags, then environment variables.

pub mod duration;
pub mod env;
pub mod source;

pub use duration::{deserialize_opt_duration, parse_duration};
pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default `host:port` for both the agent target and the collector listener.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid port in address '{0}'")]
    InvalidPort(String),

    #[error("{} invalid environment variable(s): {}", .0.len(), join_errors(.0))]
    Environment(Vec<EnvError>),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read a JSON config file into `T`.
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = std::fs::read(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Normalise a `host:port` string.
///
/// Anything that is not exactly `host:port` with both parts present falls
/// back to [`DEFAULT_ADDRESS`]; a non-numeric port is an error.
pub fn normalize_address(raw: &str) -> Result<String, ConfigError> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [host, port] if !host.is_empty() && !port.is_empty() => {
            port.parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?;
            Ok(raw.to_string())
        }
        _ => Ok(DEFAULT_ADDRESS.to_string()),
    }
}

/// Turn collected environment errors into a single fatal error.
pub fn check_env(parser: &mut EnvParser) -> Result<(), ConfigError> {
    if parser.has_errors() {
        return Err(ConfigError::Environment(parser.take_errors()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("localhost:8080").unwrap(), "localhost:8080");
        assert_eq!(normalize_address("0.0.0.0:9").unwrap(), "0.0.0.0:9");
        assert_eq!(normalize_address(":8080").unwrap(), DEFAULT_ADDRESS);
        assert_eq!(normalize_address("host:").unwrap(), DEFAULT_ADDRESS);
        assert_eq!(normalize_address("justhost").unwrap(), DEFAULT_ADDRESS);
        assert!(matches!(
            normalize_address("host:http"),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_load_json_file() {
        #[derive(Deserialize)]
        struct File {
            address: Option<String>,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"address": "collector:9090"}"#).unwrap();
        let file: File = load_json_file(&path).unwrap();
        assert_eq!(file.address.as_deref(), Some("collector:9090"));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            load_json_file::<File>(&path),
            Err(ConfigError::ParseFile { .. })
        ));
        assert!(matches!(
            load_json_file::<File>(&dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_environment_error_lists_every_problem() {
        let err = ConfigError::Environment(vec![
            EnvError::InvalidDuration {
                var: "POLL_INTERVAL".into(),
                value: "x".into(),
            },
            EnvError::InvalidValue {
                var: "RESTORE".into(),
                expected: "boolean".into(),
                value: "maybe".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 invalid"));
        assert!(msg.contains("POLL_INTERVAL") && msg.contains("RESTORE"));
    }
}
