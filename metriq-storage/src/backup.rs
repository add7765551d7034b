//! Snapshot backup and restore for the in-memory backend.
//!
//! The backup file holds one JSON metric per line (`{"id","type","value"}`
//! or `{"id","type","delta"}`). Every save rewrites the whole file through a
//! sibling temp file, so a crash mid-save leaves the previous snapshot.

use crate::repository::{Repository, RepositoryError};
use metriq_common::{Metric, MetricDto, ValidationError};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backup save/load failures. Logged by the background task, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("backup I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode metric '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}:{line}: malformed record: {source}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}:{line}: invalid record: {source}", path.display())]
    Invalid {
        path: PathBuf,
        line: usize,
        #[source]
        source: ValidationError,
    },

    #[error("{}:{line}: {source}", path.display())]
    Replay {
        path: PathBuf,
        line: usize,
        #[source]
        source: RepositoryError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// How saves are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Save on a fixed period.
    Interval(Duration),
    /// Save after every write; bursts coalesce into one save.
    Push,
}

/// Backup settings.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub path: PathBuf,
    /// Zero selects push mode.
    pub store_interval: Duration,
    pub restore: bool,
}

impl BackupConfig {
    pub fn mode(&self) -> BackupMode {
        if self.store_interval.is_zero() {
            BackupMode::Push
        } else {
            BackupMode::Interval(self.store_interval)
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write the full snapshot to `path`. Returns the number of records.
pub fn save(repo: &dyn Repository, path: &Path) -> Result<usize, PersistenceError> {
    let snapshot = repo.metrics()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let tmp = temp_path(path);
    {
        let file = File::create(&tmp).map_err(io_error(&tmp))?;
        let mut writer = BufWriter::new(file);
        for metric in &snapshot {
            let line = serde_json::to_string(&MetricDto::from(metric)).map_err(|source| {
                PersistenceError::Encode {
                    name: metric.name.clone(),
                    source,
                }
            })?;
            writeln!(writer, "{line}").map_err(io_error(&tmp))?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| io_error(&tmp)(e.into_error()))?;
        file.sync_all().map_err(io_error(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(io_error(path))?;

    Ok(snapshot.len())
}

/// Replay every record in `path` into `repo`. A missing file restores
/// nothing. Returns the number of records replayed.
pub fn restore(repo: &dyn Repository, path: &Path) -> Result<usize, PersistenceError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No backup file to restore");
            return Ok(0);
        }
        Err(e) => return Err(io_error(path)(e)),
    };

    let mut restored = 0;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(io_error(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let dto: MetricDto =
            serde_json::from_str(&line).map_err(|source| PersistenceError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                source,
            })?;
        let metric = Metric::try_from(dto).map_err(|source| PersistenceError::Invalid {
            path: path.to_path_buf(),
            line: line_no,
            source,
        })?;
        repo.restore_metric(metric)
            .map_err(|source| PersistenceError::Replay {
                path: path.to_path_buf(),
                line: line_no,
                source,
            })?;
        restored += 1;
    }

    Ok(restored)
}

async fn save_logged(repo: &Arc<dyn Repository>, path: &Path) {
    let repo = Arc::clone(repo);
    let target = path.to_path_buf();
    match tokio::task::spawn_blocking(move || save(repo.as_ref(), &target)).await {
        Ok(Ok(count)) => debug!(count, path = %path.display(), "Saved metrics backup"),
        Ok(Err(e)) => warn!("Failed to save metrics backup: {}", e),
        Err(e) => warn!("Backup save task failed: {}", e),
    }
}

/// Run the backup in the background until `cancel` fires, then save once
/// more and exit.
pub fn start(
    repo: Arc<dyn Repository>,
    config: BackupConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mode = config.mode();
    // registered before returning so no write after start() goes unnoticed
    let pending = match mode {
        BackupMode::Push => {
            let (tx, rx) = mpsc::channel(1);
            repo.set_backup(tx);
            Some(rx)
        }
        BackupMode::Interval(_) => None,
    };

    tokio::spawn(async move {
        info!(path = %config.path.display(), ?mode, "Metrics backup started");

        match (mode, pending) {
            (BackupMode::Interval(period), _) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => save_logged(&repo, &config.path).await,
                    }
                }
            }
            (BackupMode::Push, Some(mut rx)) => loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    pending = rx.recv() => match pending {
                        Some(()) => save_logged(&repo, &config.path).await,
                        None => break,
                    },
                }
            },
            (BackupMode::Push, None) => cancel.cancelled().await,
        }

        save_logged(&repo, &config.path).await;
        info!("Metrics backup stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemRepository;
    use metriq_common::POLL_COUNT;

    fn seeded() -> MemRepository {
        let repo = MemRepository::new();
        repo.set_metrics(vec![
            Metric::gauge("Alloc", 1024.5),
            Metric::counter("hits", -3),
        ])
        .unwrap();
        repo
    }

    #[test]
    fn test_mode_selection() {
        let mut config = BackupConfig {
            path: "backup.dat".into(),
            store_interval: Duration::from_secs(300),
            restore: true,
        };
        assert_eq!(config.mode(), BackupMode::Interval(Duration::from_secs(300)));
        config.store_interval = Duration::ZERO;
        assert_eq!(config.mode(), BackupMode::Push);
    }

    #[test]
    fn test_save_then_restore_reproduces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        let source = seeded();

        assert_eq!(save(&source, &path).unwrap(), 3);

        let target = MemRepository::new();
        assert_eq!(restore(&target, &path).unwrap(), 3);
        assert_eq!(target.metrics().unwrap(), source.metrics().unwrap());
        assert_eq!(
            target.metric(POLL_COUNT).unwrap(),
            Metric::counter(POLL_COUNT, 1)
        );
    }

    #[test]
    fn test_file_is_one_json_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        save(&seeded(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            [
                r#"{"id":"Alloc","type":"gauge","value":1024.5}"#,
                r#"{"id":"PollCount","type":"counter","delta":1}"#,
                r#"{"id":"hits","type":"counter","delta":-3}"#,
            ]
        );
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_save_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        std::fs::write(&path, "stale\nstale\nstale\nstale\n").unwrap();
        save(&MemRepository::new(), &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_missing_file_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MemRepository::new();
        assert_eq!(restore(&repo, &dir.path().join("absent.dat")).unwrap(), 0);
        assert!(repo.metrics().unwrap().is_empty());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        std::fs::write(
            &path,
            "\n{\"id\":\"a\",\"type\":\"counter\",\"delta\":2}\n   \n",
        )
        .unwrap();
        let repo = MemRepository::new();
        assert_eq!(restore(&repo, &path).unwrap(), 1);
        assert_eq!(repo.metric("a").unwrap(), Metric::counter("a", 2));
    }

    #[test]
    fn test_malformed_line_is_reported_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"type\":\"counter\",\"delta\":2}\n{not json\n",
        )
        .unwrap();
        let err = restore(&MemRepository::new(), &path).unwrap_err();
        assert!(matches!(err, PersistenceError::Malformed { line: 2, .. }));
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_invalid_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        std::fs::write(&path, "{\"id\":\"a\",\"type\":\"gauge\"}\n").unwrap();
        let err = restore(&MemRepository::new(), &path).unwrap_err();
        assert!(matches!(err, PersistenceError::Invalid { line: 1, .. }));
    }

    #[tokio::test]
    async fn test_push_mode_saves_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
        let cancel = CancellationToken::new();
        let config = BackupConfig {
            path: path.clone(),
            store_interval: Duration::ZERO,
            restore: false,
        };
        let handle = start(Arc::clone(&repo), config, cancel.clone());
        // written before the backup task has had a chance to run
        repo.set_metric(Metric::counter("c", 1)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("push save happened before shutdown");

        cancel.cancel();
        handle.await.unwrap();

        let restored = MemRepository::new();
        restore(&restored, &path).unwrap();
        assert_eq!(restored.metrics().unwrap(), repo.metrics().unwrap());
    }

    #[tokio::test]
    async fn test_interval_mode_saves_periodically_and_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.dat");
        let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
        repo.set_metric(Metric::counter("c", 1)).unwrap();

        let cancel = CancellationToken::new();
        let config = BackupConfig {
            path: path.clone(),
            store_interval: Duration::from_millis(20),
            restore: false,
        };
        let handle = start(Arc::clone(&repo), config, cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("interval save happened");

        repo.set_metric(Metric::counter("c", 41)).unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let restored = MemRepository::new();
        restore(&restored, &path).unwrap();
        assert_eq!(restored.metric("c").unwrap(), Metric::counter("c", 42));
    }
}
