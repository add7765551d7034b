//! In-memory backend.

use crate::repository::{Notifier, Repository, RepositoryError, Result};
use metriq_common::{Metric, MetricKind, MetricValue, ValidationError};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// A `RwLock`-guarded map. The write lock is held only while a write is
/// merged; it is released before the backup is notified.
#[derive(Debug, Default)]
pub struct MemRepository {
    metrics: RwLock<HashMap<String, MetricValue>>,
    notifier: Notifier,
}

impl MemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pending writes layered over the committed map.
struct Staged<'a> {
    base: &'a HashMap<String, MetricValue>,
    changes: HashMap<String, MetricValue>,
}

impl<'a> Staged<'a> {
    fn new(base: &'a HashMap<String, MetricValue>) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    fn get(&self, name: &str) -> Option<MetricValue> {
        self.changes
            .get(name)
            .or_else(|| self.base.get(name))
            .copied()
    }

    fn merge(&mut self, metric: &Metric) -> std::result::Result<(), ValidationError> {
        let merged = match self.get(&metric.name) {
            Some(stored) => stored.merge(metric.value, &metric.name)?,
            None => metric.value,
        };
        self.changes.insert(metric.name.clone(), merged);
        Ok(())
    }

    /// Validate and merge; gauge writes also tick `PollCount`.
    fn apply(&mut self, metric: &Metric) -> std::result::Result<(), ValidationError> {
        metric.validate()?;
        self.merge(metric)?;
        if metric.kind() == MetricKind::Gauge {
            self.merge(&Metric::poll_tick())?;
        }
        Ok(())
    }

    fn into_changes(self) -> HashMap<String, MetricValue> {
        self.changes
    }
}

impl MemRepository {
    fn commit<F>(&self, stage: F) -> Result<()>
    where
        F: FnOnce(&mut Staged<'_>) -> std::result::Result<(), ValidationError>,
    {
        let mut metrics = self.metrics.write().map_err(|_| RepositoryError::Poisoned)?;
        let changes = {
            let mut staged = Staged::new(&metrics);
            stage(&mut staged)?;
            staged.into_changes()
        };
        metrics.extend(changes);
        Ok(())
    }
}

impl Repository for MemRepository {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn set_metric(&self, metric: Metric) -> Result<()> {
        self.commit(|staged| staged.apply(&metric))?;
        self.notifier.notify();
        Ok(())
    }

    fn set_metrics(&self, batch: Vec<Metric>) -> Result<()> {
        self.commit(|staged| batch.iter().try_for_each(|metric| staged.apply(metric)))?;
        self.notifier.notify();
        Ok(())
    }

    fn metric(&self, name: &str) -> Result<Metric> {
        let metrics = self.metrics.read().map_err(|_| RepositoryError::Poisoned)?;
        metrics
            .get(name)
            .map(|value| Metric::new(name, *value))
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
    }

    fn metrics(&self) -> Result<Vec<Metric>> {
        let mut snapshot: Vec<Metric> = {
            let metrics = self.metrics.read().map_err(|_| RepositoryError::Poisoned)?;
            metrics
                .iter()
                .map(|(name, value)| Metric::new(name.clone(), *value))
                .collect()
        };
        // sort outside the lock
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshot)
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn set_backup(&self, notifier: mpsc::Sender<()>) {
        self.notifier.set(notifier);
    }

    fn restore_metric(&self, metric: Metric) -> Result<()> {
        self.commit(|staged| {
            metric.validate()?;
            staged.merge(&metric)
        })
    }
}
