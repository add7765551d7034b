//! Collector configuration.
//!
//! Values are layered defaults < JSON file (`-c`/`CONFIG`) < flags <
//! environment. A zero store interval selects push-mode backups.

use clap::Parser;
use metriq_common::config::{check_env, deserialize_opt_duration, load_json_file};
use metriq_common::{
    CodecError, ConfigError, ConfigSource, DEFAULT_ADDRESS, Decoder, EnvParser, PrivateKey,
    Sourced, normalize_address, parse_duration,
};
use metriq_storage::BackupConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_STORE_FILE: &str = "backup.dat";

#[derive(Parser, Debug, Default)]
#[command(name = "metriqd")]
#[command(author, version, about = "metriq collector - receive and store metrics")]
pub struct Cli {
    /// JSON config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Backup interval; 0 writes the backup after every update
    #[arg(short = 'i', long, value_parser = parse_duration_arg)]
    pub store_interval: Option<Duration>,

    /// Backup file path
    #[arg(short = 'f', long)]
    pub store_file: Option<PathBuf>,

    /// Restore metrics from the backup file on start
    #[arg(short = 'r', long, num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// SQLite database (path or sqlite://path); replaces the backup file
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 key for request verification and response signing
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Private key (PEM) for payload decryption
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration '{raw}'"))
}

/// JSON config file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub restore: Option<bool>,
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub store_interval: Option<Duration>,
    pub store_file: Option<PathBuf>,
    pub database_dsn: Option<String>,
    pub crypto_key: Option<PathBuf>,
}

/// Effective collector configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: Sourced<String>,
    pub store_interval: Sourced<Duration>,
    pub store_file: Sourced<PathBuf>,
    pub restore: Sourced<bool>,
    pub database_dsn: Sourced<Option<String>>,
    pub key: Sourced<Option<String>>,
    pub crypto_key: Sourced<Option<PathBuf>>,
}

impl ServerConfig {
    /// Resolve from flags, the optional config file and unprefixed env vars.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        Self::resolve(cli, &mut EnvParser::unprefixed())
    }

    pub fn resolve(cli: &Cli, env: &mut EnvParser) -> Result<Self, ConfigError> {
        let config_path = env
            .get_optional_path("CONFIG", Sourced::new(cli.config.clone(), ConfigSource::CommandLine))
            .into_inner();
        let file: FileConfig = match &config_path {
            Some(path) => load_json_file(path)?,
            None => FileConfig::default(),
        };

        let address = env.get_string(
            "ADDRESS",
            Sourced::default_value(DEFAULT_ADDRESS.to_string())
                .layer(file.address, ConfigSource::ConfigFile)
                .layer(cli.address.clone(), ConfigSource::CommandLine),
        );
        let address = Sourced {
            value: normalize_address(&address.value)?,
            ..address
        };

        let store_interval = env.get_duration(
            "STORE_INTERVAL",
            Sourced::default_value(DEFAULT_STORE_INTERVAL)
                .layer(file.store_interval, ConfigSource::ConfigFile)
                .layer(cli.store_interval, ConfigSource::CommandLine),
        );
        let store_file = env.get_optional_path(
            "FILE_STORAGE_PATH",
            Sourced::default_value(Some(PathBuf::from(DEFAULT_STORE_FILE)))
                .layer(file.store_file.map(Some), ConfigSource::ConfigFile)
                .layer(cli.store_file.clone().map(Some), ConfigSource::CommandLine),
        );
        // an empty FILE_STORAGE_PATH means the default file
        let store_file = store_file.map(|p| p.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)));
        let restore = env.get_bool(
            "RESTORE",
            Sourced::default_value(true)
                .layer(file.restore, ConfigSource::ConfigFile)
                .layer(cli.restore, ConfigSource::CommandLine),
        );
        let database_dsn = env.get_optional_string(
            "DATABASE_DSN",
            Sourced::default_value(None)
                .layer(file.database_dsn.map(Some), ConfigSource::ConfigFile)
                .layer(cli.database_dsn.clone().map(Some), ConfigSource::CommandLine),
        )
        .map(|dsn| dsn.filter(|d| !d.trim().is_empty()));
        let key = env.get_optional_string(
            "KEY",
            Sourced::default_value(None).layer(cli.key.clone().map(Some), ConfigSource::CommandLine),
        );
        let crypto_key = env.get_optional_path(
            "CRYPTO_KEY",
            Sourced::default_value(None)
                .layer(file.crypto_key.map(Some), ConfigSource::ConfigFile)
                .layer(cli.crypto_key.clone().map(Some), ConfigSource::CommandLine),
        );

        check_env(env)?;

        Ok(Self {
            address,
            store_interval,
            store_file,
            restore,
            database_dsn,
            key,
            crypto_key,
        })
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            path: self.store_file.value.clone(),
            store_interval: self.store_interval.value,
            restore: self.restore.value,
        }
    }

    /// Build the request decoder, loading the private key if configured.
    pub fn decoder(&self) -> Result<Decoder, CodecError> {
        let private_key = self
            .crypto_key
            .value
            .as_deref()
            .map(PrivateKey::load)
            .transpose()?;
        let hmac_key = self.key.value.as_ref().map(|k| k.as_bytes().to_vec());
        Ok(Decoder::new(hmac_key, private_key))
    }

    /// Log the effective configuration with value sources.
    pub fn log_summary(&self) {
        info!(
            address = %self.address.value,
            source = %self.address.source,
            "Listen address"
        );
        match &self.database_dsn.value {
            Some(dsn) => info!(dsn = %dsn, source = %self.database_dsn.source, "Storage: database"),
            None => info!(
                file = %self.store_file.value.display(),
                store_interval_ms = self.store_interval.value.as_millis() as u64,
                restore = self.restore.value,
                "Storage: memory with file backup"
            ),
        }
        info!(
            signing = self.key.value.is_some(),
            decryption = self.crypto_key.value.is_some(),
            "Ingress"
        );
    }
}
