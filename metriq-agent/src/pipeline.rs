//! Batch delivery: a fixed worker pool fed by a periodic driver.
//!
//! The job queue holds a single job, so the driver waits for a free worker
//! before handing over the next batch. While it waits it keeps draining the
//! results queue; workers therefore never block on reporting and the pool
//! cannot deadlock.

use crate::error::DeliveryError;
use crate::transport::Transport;
use metriq_storage::Repository;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work for the pool.
pub type Job = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send>>;

/// Outcome of one job, tagged with the worker that ran it.
#[derive(Debug)]
pub struct JobResult {
    pub worker: usize,
    pub error: Option<DeliveryError>,
}

/// Fixed-size pool of delivery workers.
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    results: mpsc::Receiver<JobResult>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers (at least one). They stop when `cancel` fires.
    pub fn spawn(size: usize, cancel: CancellationToken) -> Self {
        let size = size.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(1);
        let (results_tx, results_rx) = mpsc::channel(size);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let handles = (1..=size)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&jobs_rx),
                    results_tx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        debug!(workers = size, "Delivery pool started");

        Self {
            jobs: jobs_tx,
            results: results_rx,
            handles,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Hand `job` to the next free worker, logging results while waiting.
    ///
    /// Returns `false` if the pool is shutting down and the job was dropped.
    pub async fn dispatch(&mut self, job: Job, cancel: &CancellationToken) -> bool {
        let permit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                Some(result) = self.results.recv() => log_result(result),
                permit = self.jobs.reserve() => break permit.ok(),
            }
        };
        match permit {
            Some(permit) => {
                permit.send(job);
                true
            }
            None => false,
        }
    }

    /// Next job result, or `None` once every worker has exited.
    pub async fn next_result(&mut self) -> Option<JobResult> {
        self.results.recv().await
    }

    /// Close the queue and wait for every worker to exit.
    pub async fn shutdown(self) {
        let Self {
            jobs,
            results,
            handles,
        } = self;
        drop(jobs);
        drop(results);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery worker panicked");
            }
        }
        debug!("Delivery pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = next_job(&jobs) => match job {
                Some(job) => job,
                None => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = job => outcome,
        };

        let result = JobResult {
            worker,
            error: outcome.err(),
        };
        if results.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker, "Delivery worker stopped");
}

async fn next_job(jobs: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    jobs.lock().await.recv().await
}

fn log_result(result: JobResult) {
    match result.error {
        None => debug!(worker = result.worker, "Job finished"),
        Some(error) => warn!(worker = result.worker, error = %error, "Job failed"),
    }
}

/// Snapshot the local repository and deliver it.
///
/// An empty snapshot is a successful no-op.
pub async fn send_metrics_batch(
    repo: Arc<dyn Repository>,
    transport: Arc<Transport>,
) -> Result<(), DeliveryError> {
    let snapshot = repo.metrics()?;
    if snapshot.is_empty() {
        debug!("No metrics collected yet, skipping report");
        return Ok(());
    }
    transport.send(&snapshot).await?;
    Ok(())
}

/// The periodic report driver.
pub struct Pipeline {
    repo: Arc<dyn Repository>,
    transport: Arc<Transport>,
    report_interval: Duration,
    workers: usize,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        transport: Arc<Transport>,
        report_interval: Duration,
        workers: usize,
    ) -> Self {
        Self {
            repo,
            transport,
            report_interval,
            workers,
        }
    }

    /// Dispatch one batch per report interval until `cancel` fires.
    ///
    /// Failed jobs are logged and the next interval tries again.
    pub async fn run(self, cancel: CancellationToken) {
        let mut pool = WorkerPool::spawn(self.workers, cancel.clone());
        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            url = self.transport.url(),
            workers = pool.size(),
            interval_ms = self.report_interval.as_millis() as u64,
            "Report pipeline started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(result) = pool.next_result() => log_result(result),
                _ = ticker.tick() => {
                    let job: Job = Box::pin(send_metrics_batch(
                        Arc::clone(&self.repo),
                        Arc::clone(&self.transport),
                    ));
                    if !pool.dispatch(job, &cancel).await {
                        break;
                    }
                }
            }
        }

        pool.shutdown().await;
        info!("Report pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_job(counter: Arc<AtomicUsize>) -> Job {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_pool_runs_every_dispatched_job() {
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::spawn(3, cancel.clone());
        assert_eq!(pool.size(), 3);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            assert!(pool.dispatch(ok_job(counter.clone()), &cancel).await);
        }

        // dispatch already drained some results; collect the rest
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < 10 {
                pool.next_result().await;
            }
        })
        .await
        .expect("all jobs finish");
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        cancel.cancel();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_reported_with_worker_id() {
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::spawn(2, cancel.clone());

        let job: Job = Box::pin(async {
            Err(DeliveryError::Repository(
                metriq_storage::RepositoryError::Poisoned,
            ))
        });
        assert!(pool.dispatch(job, &cancel).await);

        let result = pool.next_result().await.unwrap();
        assert!((1..=2).contains(&result.worker));
        assert!(matches!(
            result.error,
            Some(DeliveryError::Repository(_))
        ));

        cancel.cancel();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_size_pool_still_has_one_worker() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(0, cancel.clone());
        assert_eq!(pool.size(), 1);
        cancel.cancel();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_on_cancelled_pool_drops_job() {
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::spawn(1, cancel.clone());

        // occupy the worker and fill the single queue slot
        let block: Job = Box::pin(std::future::pending());
        assert!(pool.dispatch(block, &cancel).await);
        let queued: Job = Box::pin(async { Ok(()) });
        assert!(pool.dispatch(queued, &cancel).await);

        cancel.cancel();
        let dropped: Job = Box::pin(async { Ok(()) });
        assert!(!pool.dispatch(dropped, &cancel).await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_job() {
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::spawn(1, cancel.clone());
        let block: Job = Box::pin(std::future::pending());
        assert!(pool.dispatch(block, &cancel).await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("workers exit on cancel");
    }
}
