//! metriq - Common Library
//!
//! Metric model, wire protocol, transport codec and ambient plumbing shared by
//! the agent (`metriq-agent`) and the collector (`metriqd`).

// Use deny instead of forbid so config tests can mutate env vars
// (env::set_var/remove_var are unsafe in Rust 2024)
#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod metric;
pub mod protocol;
pub mod shutdown;


pub use codec::{CodecError, Decoder, EncodedPayload, Encoder, PrivateKey, PublicKey};
pub use config::{
    ConfigError, ConfigSource, DEFAULT_ADDRESS, EnvError, EnvParser, Sourced, normalize_address,
    parse_duration,
};
pub use error::ValidationError;
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use metric::{Metric, MetricKind, MetricValue, POLL_COUNT};
pub use protocol::{
    BatchError, CONTENT_ENCODING_GZIP, HASH_HEADER, MetricDto, decode_batch, encode_batch, to_dtos,
};
pub use shutdown::cancel_on_signal;
