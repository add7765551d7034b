//! Delivery errors and their retry classification.

use crate::retry::RetryableError;
use metriq_common::CodecError;
use metriq_storage::RepositoryError;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Why a batch did not reach the collector.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to snapshot local metrics: {0}")]
    Repository(#[from] RepositoryError),

    #[error("failed to encode batch: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RetryableError for DeliveryError {
    /// Only a refused connection is retried; the collector is likely
    /// restarting. Timeouts, resets and everything non-transport are not.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_connect() && is_connection_refused(err),
            Self::Repository(_) | Self::Codec(_) => false,
        }
    }
}

/// Walk the source chain looking for `ECONNREFUSED`.
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connect failed")]
    struct Wrapper(#[source] io::Error);

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Wrapper);

    #[test]
    fn test_refused_found_deep_in_chain() {
        let err = Outer(Wrapper(io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_connection_refused(&err));
    }

    #[test]
    fn test_other_io_kinds_are_not_refused() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::TimedOut,
            io::ErrorKind::NotFound,
        ] {
            let err = Outer(Wrapper(io::Error::from(kind)));
            assert!(!is_connection_refused(&err), "{kind:?}");
        }
    }

    #[test]
    fn test_business_errors_are_not_retryable() {
        let err = DeliveryError::from(RepositoryError::Poisoned);
        assert!(!err.is_retryable());
        let err = DeliveryError::from(CodecError::SignatureMismatch);
        assert!(!err.is_retryable());
    }
}
