//! The storage contract shared by every backend.

use metriq_common::{Metric, ValidationError};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Errors returned by [`Repository`] operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("metric '{0}' not found")]
    NotFound(String),

    #[cfg(feature = "sqlite")]
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to open storage '{dsn}': {reason}")]
    Open { dsn: String, reason: String },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("repository lock poisoned")]
    Poisoned,
}

impl RepositoryError {
    /// Whether the caller should answer "not found" rather than "bad request".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Validation(err) => err.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Metric storage.
///
/// Every operation is safe under concurrent callers. Snapshots returned by
/// [`Repository::metrics`] are independent copies sorted by name.
pub trait Repository: Send + Sync {
    /// Short backend name for logs (`memory`, `sqlite`).
    fn backend(&self) -> &'static str;

    /// Whether the backend survives a restart on its own.
    fn is_durable(&self) -> bool;

    /// Apply one metric. A gauge write also adds 1 to `PollCount`.
    fn set_metric(&self, metric: Metric) -> Result<()>;

    /// Apply a batch atomically, in order. Nothing is applied on error.
    fn set_metrics(&self, batch: Vec<Metric>) -> Result<()>;

    fn metric(&self, name: &str) -> Result<Metric>;

    fn metrics(&self) -> Result<Vec<Metric>>;

    fn ping(&self) -> Result<()>;

    /// Register the sink notified after every successful write.
    fn set_backup(&self, notifier: mpsc::Sender<()>);

    /// Replay a persisted metric: merge rule only, no `PollCount`, no notify.
    fn restore_metric(&self, metric: Metric) -> Result<()>;
}

/// Immediate-or-drop notification sink shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    sink: Mutex<Option<mpsc::Sender<()>>>,
}

impl Notifier {
    pub(crate) fn set(&self, sender: mpsc::Sender<()>) {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(sender);
        }
    }

    /// Never blocks. A full channel already carries a pending save.
    pub(crate) fn notify(&self) {
        let Ok(sink) = self.sink.lock() else {
            return;
        };
        if let Some(sender) = sink.as_ref() {
            match sender.try_send(()) {
                Ok(()) => trace!("backup notified"),
                Err(TrySendError::Full(())) => trace!("backup already pending"),
                Err(TrySendError::Closed(())) => trace!("backup receiver gone"),
            }
        }
    }
}
