//! SQLite backend.
//!
//! Every write runs in one transaction: gauges replace, counters add, and a
//! gauge write also bumps `PollCount`. A name stored under the other kind
//! makes the upsert touch zero rows, which is reported as a kind mismatch
//! and rolls the transaction back.

mod schema;

pub use schema::{MigrationOutcome, SCHEMA_VERSION};

use crate::repository::{Notifier, Repository, RepositoryError, Result};
use metriq_common::{Metric, MetricKind, MetricValue, ValidationError};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

const UPSERT_GAUGE: &str = "INSERT INTO metrics (id, kind, value) VALUES (?1, 'gauge', ?2)
     ON CONFLICT (id) DO UPDATE SET value = excluded.value WHERE metrics.kind = 'gauge'";

const UPSERT_COUNTER: &str = "INSERT INTO metrics (id, kind, delta) VALUES (?1, 'counter', ?2)
     ON CONFLICT (id) DO UPDATE SET delta = metrics.delta + excluded.delta
     WHERE metrics.kind = 'counter'";

/// SQLite-backed metric storage.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
    notifier: Notifier,
}

impl SqliteRepository {
    /// Open (creating if needed) a file-backed database and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RepositoryError::Open {
                dsn: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests and `sqlite://:memory:`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        match schema::migrate(&mut conn) {
            Ok(MigrationOutcome::Applied { from, to }) => {
                info!(from, to, "Applied metrics schema migration");
            }
            Ok(MigrationOutcome::NoChange) => debug!("Metrics schema is current"),
            Err(schema::MigrationError::Sql(err)) => return Err(err.into()),
            Err(schema::MigrationError::TooNew { found }) => {
                return Err(RepositoryError::UnsupportedSchema {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::default(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }

    fn write<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&Transaction<'_>) -> Result<()>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // dropping an uncommitted transaction rolls it back
        apply(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

fn stored_kind(tx: &Transaction<'_>, name: &str) -> Result<Option<MetricKind>> {
    let kind: Option<String> = tx
        .query_row("SELECT kind FROM metrics WHERE id = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(kind.and_then(|k| k.parse().ok()))
}

fn stored_delta(tx: &Transaction<'_>, name: &str) -> Result<Option<i64>> {
    let delta: Option<Option<i64>> = tx
        .query_row(
            "SELECT delta FROM metrics WHERE id = ?1 AND kind = 'counter'",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(delta.flatten())
}

fn upsert(tx: &Transaction<'_>, metric: &Metric) -> Result<()> {
    if let MetricValue::Counter(delta) = metric.value {
        if let Some(stored) = stored_delta(tx, &metric.name)? {
            if stored.checked_add(delta).is_none() {
                return Err(ValidationError::CounterOverflow {
                    name: metric.name.clone(),
                    stored,
                    delta,
                }
                .into());
            }
        }
    }
    let changed = match metric.value {
        MetricValue::Gauge(v) => tx.execute(UPSERT_GAUGE, params![metric.name, v])?,
        MetricValue::Counter(d) => tx.execute(UPSERT_COUNTER, params![metric.name, d])?,
    };
    if changed == 0 {
        let stored = stored_kind(tx, &metric.name)?.unwrap_or(metric.kind());
        return Err(ValidationError::KindMismatch {
            name: metric.name.clone(),
            stored,
            incoming: metric.kind(),
        }
        .into());
    }
    Ok(())
}

fn apply(tx: &Transaction<'_>, metric: &Metric) -> Result<()> {
    metric.validate()?;
    upsert(tx, metric)?;
    if metric.kind() == MetricKind::Gauge {
        upsert(tx, &Metric::poll_tick())?;
    }
    Ok(())
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<Option<Metric>> {
    let name: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let value = match kind.as_str() {
        "gauge" => row.get::<_, Option<f64>>(2)?.map(MetricValue::Gauge),
        "counter" => row.get::<_, Option<i64>>(3)?.map(MetricValue::Counter),
        _ => None,
    };
    Ok(value.map(|value| Metric::new(name, value)))
}

impl Repository for SqliteRepository {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn set_metric(&self, metric: Metric) -> Result<()> {
        self.write(|tx| apply(tx, &metric))?;
        self.notifier.notify();
        Ok(())
    }

    fn set_metrics(&self, batch: Vec<Metric>) -> Result<()> {
        self.write(|tx| batch.iter().try_for_each(|metric| apply(tx, metric)))?;
        self.notifier.notify();
        Ok(())
    }

    fn metric(&self, name: &str) -> Result<Metric> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, kind, value, delta FROM metrics WHERE id = ?1",
            params![name],
            row_to_metric,
        )
        .optional()?
        .flatten()
        .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
    }

    fn metrics(&self) -> Result<Vec<Metric>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, kind, value, delta FROM metrics ORDER BY id")?;
        let rows = stmt.query_map([], row_to_metric)?;
        let mut snapshot = Vec::new();
        for row in rows {
            if let Some(metric) = row? {
                snapshot.push(metric);
            }
        }
        Ok(snapshot)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn set_backup(&self, notifier: mpsc::Sender<()>) {
        self.notifier.set(notifier);
    }

    fn restore_metric(&self, metric: Metric) -> Result<()> {
        self.write(|tx| {
            metric.validate()?;
            upsert(tx, &metric)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metriq_common::POLL_COUNT;

    fn repo() -> SqliteRepository {
        SqliteRepository::open_in_memory().expect("in-memory sqlite")
    }

    #[test]
    fn test_gauge_replaces_and_ticks_poll_count() {
        let repo = repo();
        repo.set_metric(Metric::gauge("temp", 10.0)).unwrap();
        repo.set_metric(Metric::gauge("temp", 20.0)).unwrap();
        assert_eq!(repo.metric("temp").unwrap(), Metric::gauge("temp", 20.0));
        assert_eq!(repo.metric(POLL_COUNT).unwrap(), Metric::counter(POLL_COUNT, 2));
    }

    #[test]
    fn test_counter_adds() {
        let repo = repo();
        repo.set_metric(Metric::counter("hits", 10)).unwrap();
        repo.set_metric(Metric::counter("hits", -4)).unwrap();
        assert_eq!(repo.metric("hits").unwrap(), Metric::counter("hits", 6));
        assert!(repo.metric(POLL_COUNT).unwrap_err().is_not_found());
    }

    #[test]
    fn test_kind_mismatch_reports_stored_kind() {
        let repo = repo();
        repo.set_metric(Metric::counter("x", 1)).unwrap();
        let err = repo.set_metric(Metric::gauge("x", 1.0)).unwrap_err();
        match err {
            RepositoryError::Validation(ValidationError::KindMismatch {
                stored, incoming, ..
            }) => {
                assert_eq!(stored, MetricKind::Counter);
                assert_eq!(incoming, MetricKind::Gauge);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let repo = repo();
        repo.set_metric(Metric::counter("hits", 1)).unwrap();
        let err = repo
            .set_metrics(vec![
                Metric::counter("hits", 100),
                Metric::gauge("new", 1.0),
                Metric::gauge("hits", 2.0),
            ])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));

        assert_eq!(repo.metric("hits").unwrap(), Metric::counter("hits", 1));
        assert!(repo.metric("new").is_err());
        assert!(repo.metric(POLL_COUNT).is_err());
    }

    #[test]
    fn test_empty_name_in_batch_applies_nothing() {
        let repo = repo();
        let err = repo
            .set_metrics(vec![Metric::gauge("ok", 1.0), Metric::gauge("", 2.0)])
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.metrics().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let repo = repo();
        repo.set_metrics(vec![
            Metric::counter("b", 1),
            Metric::gauge("a", 0.5),
        ])
        .unwrap();
        let names: Vec<String> = repo.metrics().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, [POLL_COUNT, "a", "b"]);
    }

    #[test]
    fn test_restore_merges_without_poll_count() {
        let repo = repo();
        repo.restore_metric(Metric::gauge("g", 1.0)).unwrap();
        repo.restore_metric(Metric::counter("c", 2)).unwrap();
        repo.restore_metric(Metric::counter("c", 3)).unwrap();
        assert_eq!(repo.metric("c").unwrap(), Metric::counter("c", 5));
        assert!(repo.metric(POLL_COUNT).is_err());
    }

    #[test]
    fn test_ping() {
        assert!(repo().ping().is_ok());
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");
        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.set_metric(Metric::counter("hits", 7)).unwrap();
        }
        let repo = SqliteRepository::open(&path).unwrap();
        assert_eq!(repo.metric("hits").unwrap(), Metric::counter("hits", 7));
    }

    #[test]
    fn test_counter_overflow_is_rejected() {
        let repo = repo();
        repo.set_metric(Metric::counter("c", i64::MAX)).unwrap();
        let err = repo.set_metric(Metric::counter("c", 1)).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Validation(ValidationError::CounterOverflow { .. })
        ));
        assert_eq!(repo.metric("c").unwrap(), Metric::counter("c", i64::MAX));
    }
}
