//! Worker pool: a fixed set of named workers draining one shared job queue.
//!
//! - `submit()` never blocks; it fails once shutdown has begun.
//! - `shutdown(timeout)` stops intake, waits for queued + in-flight jobs, then
//!   cancels whatever is still queued. Running jobs are never aborted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::observability::PoolCounts;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool must be spawned inside a tokio runtime")]
    NoRuntime,

    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Prefix of worker names (`{name}-{index}`).
    pub name: String,

    /// Number of workers. Fixed for the lifetime of the pool.
    pub workers: usize,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PoolError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new("logic", 8)
    }
}

/// Per-worker view handed to every job.
pub struct JobContext {
    worker: String,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// True once the pool has started force-cancelling. Long-running jobs
    /// check this between units of work.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// What a job did, in task units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Tasks whose handler ran (including faulted ones).
    pub executed: u64,
    /// Subset of `executed` whose handler failed or panicked.
    pub faulted: u64,
    /// Tasks skipped because their session was already closed.
    pub skipped: u64,
    /// Tasks discarded by force-cancel.
    pub cancelled: u64,
}

impl JobReport {
    pub fn merge(&mut self, other: JobReport) {
        self.executed += other.executed;
        self.faulted += other.faulted;
        self.skipped += other.skipped;
        self.cancelled += other.cancelled;
    }
}

/// A unit of work the pool can run or discard.
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>, ctx: &JobContext) -> JobReport;

    /// Drop the job without running it; returns how many tasks were discarded.
    fn cancel(self: Box<Self>) -> u64;
}

type BoxJob = Box<dyn Job>;

#[derive(Default)]
struct Stats {
    jobs: AtomicU64,
    executed: AtomicU64,
    faulted: AtomicU64,
    skipped: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

impl Stats {
    fn record(&self, report: JobReport) {
        self.executed.fetch_add(report.executed, Ordering::Relaxed);
        self.faulted.fetch_add(report.faulted, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.cancelled.fetch_add(report.cancelled, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolCounts {
        PoolCounts {
            jobs: self.jobs.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// State the workers themselves hold on to. Deliberately excludes the sender:
/// once every `WorkerPool` handle is gone the channel closes and workers exit
/// after draining it.
struct Shared {
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<BoxJob>>,
    stats: Stats,
}

struct Inner {
    name: String,
    workers: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<BoxJob>>>,
    cancel_tx: watch::Sender<bool>,
    join_set: Mutex<Option<JoinSet<()>>>,
    shared: Arc<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // JoinSet aborts its tasks on drop; let in-flight jobs finish instead.
        if let Some(mut workers) = self.join_set.get_mut().take() {
            workers.detach_all();
        }
    }
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Everything queued finished within the timeout.
    pub graceful: bool,
    /// Workers still executing a job when shutdown gave up waiting. They were
    /// detached, not aborted.
    pub unfinished_workers: usize,
    pub counts: PoolCounts,
}

/// Cheap, cloneable handle to a fixed-size pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current tokio runtime.
    pub fn spawn(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            receiver: tokio::sync::Mutex::new(rx),
            stats: Stats::default(),
        });

        let mut join_set = JoinSet::new();
        for index in 0..config.workers {
            let worker = format!("{}-{}", config.name, index);
            let span = info_span!("worker", name = %worker);
            join_set.spawn_on(
                worker_loop(worker, Arc::clone(&shared), cancel_rx.clone()).instrument(span),
                &handle,
            );
        }

        info!(pool = %config.name, workers = config.workers, "worker pool started");

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                workers: config.workers,
                sender: Mutex::new(Some(tx)),
                cancel_tx,
                join_set: Mutex::new(Some(join_set)),
                shared,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    pub fn counts(&self) -> PoolCounts {
        self.inner.shared.stats.snapshot()
    }

    /// Queue a job. After shutdown has begun the job is cancelled on the
    /// spot, its tasks are counted as rejected, and `Closed` is returned.
    pub fn submit(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        match self.try_submit(job) {
            Ok(()) => Ok(()),
            Err(job) => {
                let discarded = job.cancel();
                self.record_rejected(discarded);
                Err(PoolError::Closed)
            }
        }
    }

    /// Queue a job, or hand it back untouched if the pool is closed. The
    /// caller owns the job's accounting on the error path.
    pub(crate) fn try_submit(&self, job: Box<dyn Job>) -> Result<(), Box<dyn Job>> {
        let sender = self.inner.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(job);
        };
        match tx.send(job) {
            Ok(()) => {
                self.inner.shared.stats.jobs.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendError(job)) => Err(job),
        }
    }

    /// Count tasks refused because the pool was closed.
    pub(crate) fn record_rejected(&self, tasks: u64) {
        self.inner
            .shared
            .stats
            .rejected
            .fetch_add(tasks, Ordering::Relaxed);
    }

    /// Stop intake. Queued jobs still run (or are cancelled by shutdown).
    pub(crate) fn close(&self) {
        drop(self.inner.sender.lock().take());
    }

    /// Stop intake, wait up to `timeout` for the queue to drain, then cancel
    /// whatever is still queued and give running jobs one more `timeout` to
    /// reach a cancellation point.
    ///
    /// Calling it again after the first shutdown just reports the counts.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        // Workers exit once the closed channel runs dry.
        self.close();

        let workers = self.inner.join_set.lock().take();
        let Some(mut workers) = workers else {
            return ShutdownReport {
                graceful: true,
                unfinished_workers: 0,
                counts: self.counts(),
            };
        };

        info!(pool = %self.inner.name, timeout_ms = timeout.as_millis() as u64, "shutting down worker pool");

        if join_all(&mut workers, timeout).await {
            info!(pool = %self.inner.name, "worker pool drained");
            return ShutdownReport {
                graceful: true,
                unfinished_workers: 0,
                counts: self.counts(),
            };
        }

        warn!(pool = %self.inner.name, "worker pool did not drain in time; cancelling queued jobs");
        let _ = self.inner.cancel_tx.send(true);
        let discarded = self.cancel_queued().await;

        let finished = join_all(&mut workers, timeout).await;
        let unfinished_workers = workers.len();
        if !finished {
            warn!(
                pool = %self.inner.name,
                unfinished_workers,
                "workers still busy after cancel; detaching"
            );
            workers.detach_all();
        }

        let counts = self.counts();
        info!(pool = %self.inner.name, discarded, cancelled = counts.cancelled, "worker pool stopped");
        ShutdownReport {
            graceful: false,
            unfinished_workers,
            counts,
        }
    }

    /// Close and cancel without waiting. Used when startup fails after the
    /// pool was built.
    ///
    /// Queued jobs are cancelled and counted by the workers as they see the
    /// cancel signal and exit; running jobs finish first.
    pub fn abort(&self) {
        self.close();
        let _ = self.inner.cancel_tx.send(true);

        if let Some(mut workers) = self.inner.join_set.lock().take() {
            workers.detach_all();
        }
        debug!(pool = %self.inner.name, "worker pool aborted");
    }

    async fn cancel_queued(&self) -> u64 {
        self.inner.shared.cancel_queued().await
    }
}

impl Shared {
    /// Cancel every job still sitting in the channel.
    async fn cancel_queued(&self) -> u64 {
        let mut rx = self.receiver.lock().await;
        let mut discarded = 0;
        while let Ok(job) = rx.try_recv() {
            discarded += job.cancel();
        }
        self.stats.cancelled.fetch_add(discarded, Ordering::Relaxed);
        discarded
    }
}

async fn join_all(workers: &mut JoinSet<()>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .is_ok()
}

async fn worker_loop(
    worker: String,
    shared: Arc<Shared>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let ctx = JobContext {
        worker: worker.clone(),
        cancel: cancel_rx.clone(),
    };
    // changed() errors at once after cancel_tx is dropped; stop watching then
    let mut watching = true;

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let job = {
            let mut rx = shared.receiver.lock().await;
            tokio::select! {
                changed = cancel_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                    continue;
                }
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else {
            // closed and drained
            break;
        };

        if ctx.is_cancelled() {
            let discarded = job.cancel();
            shared.stats.cancelled.fetch_add(discarded, Ordering::Relaxed);
            break;
        }

        match AssertUnwindSafe(job.run(&ctx)).catch_unwind().await {
            Ok(report) => shared.stats.record(report),
            Err(_) => {
                error!(worker = %worker, "job panicked outside a task boundary");
                shared.stats.faulted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if ctx.is_cancelled() {
        let discarded = shared.cancel_queued().await;
        if discarded > 0 {
            debug!(worker = %worker, discarded, "cancelled queued jobs on exit");
        }
    }

    debug!(worker = %worker, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct CountJob(Arc<AtomicUsize>);

    #[async_trait]
    impl Job for CountJob {
        async fn run(self: Box<Self>, _ctx: &JobContext) -> JobReport {
            self.0.fetch_add(1, Ordering::SeqCst);
            JobReport {
                executed: 1,
                ..JobReport::default()
            }
        }

        fn cancel(self: Box<Self>) -> u64 {
            1
        }
    }

    struct SleepJob(Duration);

    #[async_trait]
    impl Job for SleepJob {
        async fn run(self: Box<Self>, _ctx: &JobContext) -> JobReport {
            tokio::time::sleep(self.0).await;
            JobReport {
                executed: 1,
                ..JobReport::default()
            }
        }

        fn cancel(self: Box<Self>) -> u64 {
            1
        }
    }

    /// Raises its flag once running, then sleeps.
    struct FlagSleepJob(Arc<AtomicBool>, Duration);

    #[async_trait]
    impl Job for FlagSleepJob {
        async fn run(self: Box<Self>, _ctx: &JobContext) -> JobReport {
            self.0.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.1).await;
            JobReport {
                executed: 1,
                ..JobReport::default()
            }
        }

        fn cancel(self: Box<Self>) -> u64 {
            1
        }
    }

    struct PanicJob;

    #[async_trait]
    impl Job for PanicJob {
        async fn run(self: Box<Self>, _ctx: &JobContext) -> JobReport {
            panic!("job blew up");
        }

        fn cancel(self: Box<Self>) -> u64 {
            1
        }
    }

    struct NameJob(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Job for NameJob {
        async fn run(self: Box<Self>, ctx: &JobContext) -> JobReport {
            self.0.lock().push(ctx.worker().to_string());
            JobReport::default()
        }

        fn cancel(self: Box<Self>) -> u64 {
            0
        }
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let err = WorkerPool::spawn(PoolConfig::default()).err();
        assert_eq!(err, Some(PoolError::NoRuntime));
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_config() {
        let err = WorkerPool::spawn(PoolConfig::new("logic", 0)).err();
        assert!(matches!(err, Some(PoolError::InvalidConfig(_))));

        let err = WorkerPool::spawn(PoolConfig::new("  ", 2)).err();
        assert!(matches!(err, Some(PoolError::InvalidConfig(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn executes_every_submitted_job() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            pool.submit(Box::new(CountJob(counter.clone()))).unwrap();
        }

        let report = pool.shutdown(Duration::from_secs(5)).await;
        assert!(report.graceful);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(report.counts.jobs, 100);
        assert_eq!(report.counts.executed, 100);
        assert_eq!(report.counts.cancelled, 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        pool.shutdown(Duration::from_secs(1)).await;

        assert!(pool.is_closed());
        let counter = Arc::new(AtomicUsize::new(0));
        let err = pool.submit(Box::new(CountJob(counter.clone()))).unwrap_err();
        assert_eq!(err, PoolError::Closed);
        assert_eq!(pool.counts().rejected, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Box::new(PanicJob)).unwrap();
        pool.submit(Box::new(CountJob(counter.clone()))).unwrap();

        let report = pool.shutdown(Duration::from_secs(5)).await;
        assert!(report.graceful);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.counts.faulted, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_timeout_cancels_queued_jobs() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Box::new(SleepJob(Duration::from_millis(300)))).unwrap();
        for _ in 0..5 {
            pool.submit(Box::new(CountJob(counter.clone()))).unwrap();
        }

        let report = pool.shutdown(Duration::from_millis(200)).await;
        assert!(!report.graceful);
        assert_eq!(report.unfinished_workers, 0);
        assert_eq!(report.counts.executed, 1);
        assert_eq!(report.counts.cancelled, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_are_named_after_pool() {
        let pool = WorkerPool::spawn(PoolConfig::new("io", 2)).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..20 {
            pool.submit(Box::new(NameJob(names.clone()))).unwrap();
        }
        pool.shutdown(Duration::from_secs(5)).await;

        let names = names.lock();
        assert_eq!(names.len(), 20);
        assert!(names.iter().all(|n| n == "io-0" || n == "io-1"));
    }

    #[tokio::test]
    async fn second_shutdown_only_reports() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 2)).unwrap();
        let first = pool.shutdown(Duration::from_secs(1)).await;
        let second = pool.shutdown(Duration::from_secs(1)).await;
        assert!(first.graceful);
        assert!(second.graceful);
        assert_eq!(first.counts, second.counts);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abort_counts_jobs_left_in_queue() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicBool::new(false));

        pool.submit(Box::new(FlagSleepJob(started.clone(), Duration::from_millis(100))))
            .unwrap();
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for _ in 0..5 {
            pool.submit(Box::new(CountJob(counter.clone()))).unwrap();
        }
        pool.abort();

        // the running job finishes; its worker cancels the rest on the way out
        let mut counts = pool.counts();
        for _ in 0..100 {
            if counts.executed + counts.cancelled == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            counts = pool.counts();
        }
        assert_eq!(counts.executed, 1);
        assert_eq!(counts.cancelled, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_cancels_without_waiting() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        pool.abort();
        assert!(pool.is_closed());

        let err = pool.submit(Box::new(SleepJob(Duration::from_secs(10)))).unwrap_err();
        assert_eq!(err, PoolError::Closed);
    }
}
