//! metriq storage engine.
//!
//! A [`Repository`] holds the current value of every metric. Two backends
//! exist: [`MemRepository`] (process memory, optionally backed up to a file
//! by [`backup`]) and, with the `sqlite` feature, [`SqliteRepository`].

#![forbid(unsafe_code)]

pub mod backup;
pub mod mem;
pub mod repository;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backup::{BackupConfig, BackupMode, PersistenceError, restore, save};
pub use mem::MemRepository;
pub use repository::{Repository, RepositoryError};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;

use std::sync::Arc;
use tracing::info;

/// Where the metrics live, parsed from a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    SqliteMemory,
    SqliteFile(std::path::PathBuf),
}

impl Backend {
    /// Parse a DSN. Empty means in-memory; otherwise `sqlite://path`,
    /// `sqlite:path` or a bare path to a SQLite file.
    pub fn from_dsn(dsn: Option<&str>) -> Result<Self, RepositoryError> {
        let Some(dsn) = dsn.map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(Self::Memory);
        };
        let path = dsn
            .strip_prefix("sqlite://")
            .or_else(|| dsn.strip_prefix("sqlite:"))
            .unwrap_or(dsn);
        if path.contains("://") {
            return Err(RepositoryError::Open {
                dsn: dsn.to_string(),
                reason: "only sqlite DSNs are supported".to_string(),
            });
        }
        if path == ":memory:" {
            return Ok(Self::SqliteMemory);
        }
        if path.is_empty() {
            return Err(RepositoryError::Open {
                dsn: dsn.to_string(),
                reason: "missing database path".to_string(),
            });
        }
        Ok(Self::SqliteFile(path.into()))
    }
}

/// Open the repository selected by `dsn`.
pub fn open_repository(dsn: Option<&str>) -> Result<Arc<dyn Repository>, RepositoryError> {
    let backend = Backend::from_dsn(dsn)?;
    let repo: Arc<dyn Repository> = match backend {
        Backend::Memory => Arc::new(MemRepository::new()),
        #[cfg(feature = "sqlite")]
        Backend::SqliteMemory => Arc::new(SqliteRepository::open_in_memory()?),
        #[cfg(feature = "sqlite")]
        Backend::SqliteFile(path) => Arc::new(SqliteRepository::open(&path)?),
        #[cfg(not(feature = "sqlite"))]
        Backend::SqliteMemory | Backend::SqliteFile(_) => {
            return Err(RepositoryError::Open {
                dsn: dsn.unwrap_or_default().to_string(),
                reason: "built without the sqlite feature".to_string(),
            });
        }
    };
    info!(backend = repo.backend(), "Opened metric repository");
    Ok(repo)
}
