//! Structured logging initialization for metriq binaries.
//!
//! Both `metriq-agent` and `metriqd` call [`init_logging`] once at startup
//! with a [`LogConfig`] built from `METRIQ_LOG_*` variables.

use crate::config::EnvParser;
use anyhow::Result;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-friendly, multi-line.
    Pretty,
    /// One JSON object per event.
    Json,
    /// Single-line.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    pub format: LogFormat,
    /// Optional file path; the file is rotated daily.
    pub file_path: Option<PathBuf>,
    /// Per-target log level overrides.
    pub targets: BTreeMap<String, String>,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file_line: bool,
    /// Write console logs to stderr instead of stdout.
    pub use_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
            targets: BTreeMap::new(),
            with_target: true,
            with_thread_ids: false,
            with_file_line: false,
            use_stderr: false,
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from environment variables.
    ///
    /// - METRIQ_LOG_LEVEL
    /// - METRIQ_LOG_FORMAT (pretty|json|compact)
    /// - METRIQ_LOG_FILE (path to a daily-rotated log file)
    /// - METRIQ_LOG_TARGETS (comma-separated target=level list)
    ///
    /// Invalid values fall back to defaults; logging is never a reason to
    /// refuse to start.
    pub fn from_env(default_level: &str) -> Self {
        let mut env = EnvParser::new("METRIQ_");
        let mut config = Self {
            level: env.get_log_level("LOG_LEVEL", default_level).value,
            ..Self::default()
        };

        let format = env.get_string("LOG_FORMAT", String::new()).value;
        if let Some(parsed) = LogFormat::parse(&format) {
            config.format = parsed;
        }

        config.file_path = env.get_optional_path("LOG_FILE", None::<PathBuf>).value;

        let targets = env.get_string_list("LOG_TARGETS", Vec::new()).value;
        config.targets = parse_target_overrides(&targets);

        config
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.use_stderr = true;
        self
    }

    /// Build the effective EnvFilter, honoring RUST_LOG if set.
    pub fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }

        let mut filter = self.level.clone();
        for (target, level) in &self.targets {
            filter.push_str(&format!(",{}={}", target, level));
        }
        EnvFilter::new(filter)
    }
}

/// Guards required to keep background logging workers alive.
pub struct LoggingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize tracing-based logging for the current process.
///
/// The returned guards must live until the process exits or buffered file
/// output is lost.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = config.env_filter();
    let (writer, file_guard) = build_writer(config);
    let ansi = file_guard.is_none();

    let builder = fmt::Subscriber::builder()
        .with_writer(writer)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file_line)
        .with_line_number(config.with_file_line)
        .with_env_filter(filter);

    match config.format {
        LogFormat::Pretty => finish_subscriber(builder.with_ansi(ansi).pretty().finish(), file_guard),
        LogFormat::Json => finish_subscriber(builder.with_ansi(false).json().finish(), file_guard),
        LogFormat::Compact => {
            finish_subscriber(builder.with_ansi(ansi).compact().finish(), file_guard)
        }
    }
}

fn build_writer(config: &LogConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let base_writer = if config.use_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    match config.file_path.as_ref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| OsStr::new("metriq.log"));
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(base_writer.and(non_blocking)), Some(guard))
        }
        None => (base_writer, None),
    }
}

fn finish_subscriber<S>(subscriber: S, file_guard: Option<WorkerGuard>) -> Result<LoggingGuards>
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init() {
        // a second init (tests, embedded use) keeps the first subscriber
        if !err.to_string().contains("already initialized") {
            return Err(err.into());
        }
    }

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

fn parse_target_overrides(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(target, level)| (target.trim(), level.trim().to_lowercase()))
        .filter(|(target, level)| !target.is_empty() && is_valid_level(level))
        .map(|(target, level)| (target.to_string(), level))
        .collect()
}

fn is_valid_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}
