//! Agent configuration.
//!
//! Values are layered defaults < JSON file (`-c`/`CONFIG`) < flags <
//! environment. A zero poll or report interval falls back to the default.

use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_CLIENT_TIMEOUT;
use clap::Parser;
use metriq_common::config::{check_env, deserialize_opt_duration, load_json_file};
use metriq_common::{
    CodecError, ConfigError, ConfigSource, DEFAULT_ADDRESS, Encoder, EnvParser, PublicKey, Sourced,
    normalize_address, parse_duration,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RATE_LIMIT: u64 = 5;
const MAX_RATE_LIMIT: u64 = 1024;

#[derive(Parser, Debug, Default)]
#[command(name = "metriq-agent")]
#[command(author, version, about = "metriq agent - collect host metrics and report them")]
pub struct Cli {
    /// JSON config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Collector address (host:port)
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Poll interval (seconds, or 500ms/10s/1m)
    #[arg(short = 'p', long, value_parser = parse_duration_arg)]
    pub poll_interval: Option<Duration>,

    /// Report interval (seconds, or 500ms/10s/1m)
    #[arg(short = 'r', long, value_parser = parse_duration_arg)]
    pub report_interval: Option<Duration>,

    /// HMAC-SHA256 signing key
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Number of concurrent delivery workers
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(1..=MAX_RATE_LIMIT))]
    pub rate_limit: Option<u64>,

    /// Collector public key (PEM) for payload encryption
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
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub poll_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub report_interval: Option<Duration>,
    pub rate_limit: Option<u64>,
    pub crypto_key: Option<PathBuf>,
}

/// Effective agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: Sourced<String>,
    pub poll_interval: Sourced<Duration>,
    pub report_interval: Sourced<Duration>,
    pub key: Sourced<Option<String>>,
    pub rate_limit: Sourced<u64>,
    pub crypto_key: Sourced<Option<PathBuf>>,
    pub client_timeout: Duration,
    pub retry: RetryPolicy,
}

impl AgentConfig {
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

        let poll_interval = interval(
            env,
            "POLL_INTERVAL",
            DEFAULT_POLL_INTERVAL,
            file.poll_interval,
            cli.poll_interval,
        );
        let report_interval = interval(
            env,
            "REPORT_INTERVAL",
            DEFAULT_REPORT_INTERVAL,
            file.report_interval,
            cli.report_interval,
        );

        let key = env.get_optional_string(
            "KEY",
            Sourced::default_value(None).layer(cli.key.clone().map(Some), ConfigSource::CommandLine),
        );
        let rate_limit = env.get_u64_range(
            "RATE_LIMIT",
            Sourced::default_value(DEFAULT_RATE_LIMIT)
                .layer(file.rate_limit.filter(|n| *n > 0), ConfigSource::ConfigFile)
                .layer(cli.rate_limit, ConfigSource::CommandLine),
            1,
            MAX_RATE_LIMIT,
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
            poll_interval,
            report_interval,
            key,
            rate_limit,
            crypto_key,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            retry: RetryPolicy::default(),
        })
    }

    /// Build the payload encoder, loading the public key if configured.
    pub fn encoder(&self) -> Result<Encoder, CodecError> {
        let public_key = self
            .crypto_key
            .value
            .as_deref()
            .map(PublicKey::load)
            .transpose()?;
        let hmac_key = self.key.value.as_ref().map(|k| k.as_bytes().to_vec());
        Ok(Encoder::new(hmac_key, public_key))
    }

    /// Log the effective configuration with value sources.
    pub fn log_summary(&self) {
        info!(
            address = %self.address.value,
            source = %self.address.source,
            "Collector address"
        );
        info!(
            poll_ms = self.poll_interval.value.as_millis() as u64,
            poll_source = %self.poll_interval.source,
            report_ms = self.report_interval.value.as_millis() as u64,
            report_source = %self.report_interval.source,
            "Intervals"
        );
        info!(
            workers = self.rate_limit.value,
            signing = self.key.value.is_some(),
            encryption = self.crypto_key.value.is_some(),
            "Delivery"
        );
    }
}

fn interval(
    env: &mut EnvParser,
    name: &str,
    default: Duration,
    file: Option<Duration>,
    flag: Option<Duration>,
) -> Sourced<Duration> {
    let layered = Sourced::default_value(default)
        .layer(file, ConfigSource::ConfigFile)
        .layer(flag, ConfigSource::CommandLine);
    let resolved = env.get_duration(name, layered);
    if resolved.value.is_zero() {
        Sourced::default_value(default)
    } else {
        resolved
    }
}
