//! Sequencer - per-session FIFO executor on top of the shared worker pool
//!
//! # State machine
//!
//! ```text
//!            enqueue (CAS)              drain starts (CAS)
//!   IDLE ─────────────────▶ SCHEDULED ───────────────────▶ DRAINING
//!    ▲                          │                              │
//!    │     cancel / rejected    │                              │
//!    ├──────────────────────────┘                              │
//!    │             queue observed empty (CAS, under queue lock)│
//!    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - A drain job is submitted only by the producer that wins `IDLE → SCHEDULED`,
//!   so at most one drain per sequencer is ever queued or running.
//! - The closed check, the append and the drain submission share one queue
//!   critical section. A producer that gets `Ok` has its task behind a live
//!   drain; a refused drain only ever carries the task of the producer that
//!   tried to submit it, and that producer gets `PoolClosed`.
//! - `DRAINING → IDLE` happens while holding the queue lock, in the same
//!   critical section that observed the queue empty. Producers append under
//!   that lock too, so a task appended before the check is always seen by the
//!   drain, and a task appended after it finds `IDLE` and schedules a new
//!   drain. No wake-up is lost and the drain never resubmits itself.
//! - Tasks run one at a time on whichever worker holds the drain, in the
//!   order they were appended.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::task::Task;
use crate::domain::SequencerId;
use crate::error::DispatchError;
use crate::worker::{Job, JobContext, JobReport, WorkerPool};

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const DRAINING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequencerState {
    /// Nothing pending, no drain scheduled.
    Idle,
    /// A drain was submitted to the pool but has not started.
    Scheduled,
    /// A drain is running on a pool worker.
    Draining,
}

impl SequencerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => SequencerState::Idle,
            SCHEDULED => SequencerState::Scheduled,
            _ => SequencerState::Draining,
        }
    }
}

struct Inner {
    id: SequencerId,
    queue: Mutex<VecDeque<Task>>,
    state: AtomicU8,
    pool: WorkerPool,
    /// Runs after a producer wins the schedule CAS, right before it submits.
    #[cfg(test)]
    before_submit: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Cloneable handle; clones share one queue.
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

impl Sequencer {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: SequencerId::generate(),
                queue: Mutex::new(VecDeque::new()),
                state: AtomicU8::new(IDLE),
                pool,
                #[cfg(test)]
                before_submit: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> SequencerId {
        self.inner.id
    }

    /// Tasks waiting to run (excludes the one currently executing).
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn state(&self) -> SequencerState {
        SequencerState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    /// Append a task and make sure a drain will see it.
    ///
    /// Fails with `PoolClosed` once the pool stopped accepting work; the
    /// task is then counted as rejected.
    pub fn enqueue(&self, task: Task) -> Result<(), DispatchError> {
        let mut queue = self.inner.queue.lock();
        if self.inner.pool.is_closed() {
            drop(queue);
            self.inner.pool.record_rejected(1);
            return Err(DispatchError::PoolClosed);
        }

        queue.push_back(task.in_sequence(self.inner.id));

        if self
            .inner
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            #[cfg(test)]
            if let Some(hook) = self.inner.before_submit.lock().take() {
                hook();
            }

            if self.inner.pool.try_submit(Box::new(Drain(self.clone()))).is_err() {
                // IDLE implies the queue was empty before our push.
                let refused = std::mem::take(&mut *queue);
                self.inner.state.store(IDLE, Ordering::Release);
                drop(queue);
                self.inner.pool.record_rejected(refused.len() as u64);
                debug!(sequencer = %self.inner.id, "drain refused; pool closed");
                return Err(DispatchError::PoolClosed);
            }
        }
        Ok(())
    }

    async fn drain(&self, ctx: &JobContext) -> JobReport {
        let mut report = JobReport::default();

        if self
            .inner
            .state
            .compare_exchange(SCHEDULED, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // only reachable if a drain was cancelled and its job still ran
            warn!(sequencer = %self.inner.id, state = ?self.state(), "drain started outside SCHEDULED");
            return report;
        }

        loop {
            if ctx.is_cancelled() {
                let discarded = self.discard_pending();
                debug!(sequencer = %self.inner.id, discarded, "drain cancelled");
                report.cancelled += discarded;
                break;
            }

            let next = {
                let mut queue = self.inner.queue.lock();
                let next = queue.pop_front();
                if next.is_none() {
                    let exited = self
                        .inner
                        .state
                        .compare_exchange(DRAINING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    debug_assert!(exited, "only the drain leaves DRAINING");
                }
                next
            };

            let Some(task) = next else {
                break;
            };
            report.merge(task.execute().await.report());
        }

        report
    }

    /// Drop every pending task and go back to IDLE. Returns how many tasks
    /// were dropped.
    fn discard_pending(&self) -> u64 {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            self.inner.state.store(IDLE, Ordering::Release);
            std::mem::take(&mut *queue)
        };
        // Tasks hold sessions, and sessions may hold this sequencer; drop them
        // outside the lock.
        dropped.len() as u64
    }
}

/// The pool job draining one sequencer.
struct Drain(Sequencer);

#[async_trait]
impl Job for Drain {
    async fn run(self: Box<Self>, ctx: &JobContext) -> JobReport {
        self.0.drain(ctx).await
    }

    fn cancel(self: Box<Self>) -> u64 {
        self.0.discard_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::task::Execution;
    use crate::domain::Message;
    use crate::error::HandlerError;
    use crate::impls::{MemorySession, TracingEventSink};
    use crate::ports::SessionRef;
    use crate::typed::Handler;
    use crate::worker::PoolConfig;
    use rand::Rng;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    /// Records payloads in execution order plus enter/exit instants.
    ///
    /// Payload "0" waits for `gate` first, which lets a test hold the drain
    /// open while it enqueues more work.
    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<u64>>,
        spans: Mutex<Vec<(Instant, Instant)>>,
        active: AtomicU8,
        overlapped: AtomicBool,
        gated: bool,
        gate: Notify,
    }

    impl Recorder {
        fn gated() -> Self {
            Self {
                gated: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, _session: &SessionRef, message: &Message) -> Result<(), HandlerError> {
            let enter = Instant::now();
            if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }

            let value: u64 = std::str::from_utf8(message.payload())
                .map_err(|e| HandlerError::failed(e.to_string()))?
                .parse()
                .map_err(|e: std::num::ParseIntError| HandlerError::failed(e.to_string()))?;
            if self.gated && value == 0 {
                self.gate.notified().await;
            }
            if value % 7 == 0 {
                tokio::task::yield_now().await;
            }
            self.order.lock().push(value);

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.spans.lock().push((enter, Instant::now()));
            Ok(())
        }
    }

    fn execution() -> Arc<Execution> {
        Arc::new(Execution {
            events: Arc::new(TracingEventSink),
            skip_closed_sessions: false,
        })
    }

    fn task(handler: &Arc<Recorder>, session: &SessionRef, exec: &Arc<Execution>, n: u64) -> Task {
        Task::new(
            handler.clone(),
            session.clone(),
            Message::new(1u16, n.to_string()),
            exec.clone(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_in_enqueue_order_from_one_producer() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 4)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::default());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        for n in 0..500 {
            sequencer.enqueue(task(&handler, &session, &exec, n)).unwrap();
        }

        let report = pool.shutdown(Duration::from_secs(10)).await;
        assert!(report.graceful);
        assert_eq!(*handler.order.lock(), (0..500).collect::<Vec<_>>());
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert_eq!(sequencer.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_enqueue_order_without_overlap() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 4)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::default());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        // The lock makes "enqueue order" observable: whoever holds it both
        // takes the next number and enqueues it.
        let counter = Arc::new(Mutex::new(0u64));
        let mut producers = Vec::new();
        for _ in 0..8 {
            let sequencer = sequencer.clone();
            let handler = handler.clone();
            let session = session.clone();
            let exec = exec.clone();
            let counter = counter.clone();
            producers.push(std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    {
                        let mut next = counter.lock();
                        sequencer.enqueue(task(&handler, &session, &exec, *next)).unwrap();
                        *next += 1;
                    }
                    if rng.gen_bool(0.1) {
                        std::thread::sleep(Duration::from_micros(rng.gen_range(1..50)));
                    }
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        let report = pool.shutdown(Duration::from_secs(10)).await;
        assert!(report.graceful);
        assert_eq!(report.counts.executed, 1600);
        assert_eq!(*handler.order.lock(), (0..1600).collect::<Vec<_>>());
        assert!(!handler.overlapped.load(Ordering::SeqCst));

        // enter/exit intervals never overlap
        let mut spans = handler.spans.lock().clone();
        spans.sort_by_key(|(enter, _)| *enter);
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping executions");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn occupies_at_most_one_pool_job_at_a_time() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 4)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::gated());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        sequencer.enqueue(task(&handler, &session, &exec, 0)).unwrap();
        while handler.active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The drain is parked on the gate; this burst must not submit more jobs.
        for n in 1..50 {
            sequencer.enqueue(task(&handler, &session, &exec, n)).unwrap();
        }
        assert_eq!(sequencer.state(), SequencerState::Draining);
        assert_eq!(sequencer.pending(), 49);
        assert_eq!(pool.counts().jobs, 1);

        handler.gate.notify_one();
        let report = pool.shutdown(Duration::from_secs(10)).await;

        assert!(report.graceful);
        assert_eq!(report.counts.jobs, 1);
        assert_eq!(report.counts.executed, 50);
        assert_eq!(*handler.order.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_timeout_cancels_at_task_boundary() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 2)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::gated());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        for n in 0..10 {
            sequencer.enqueue(task(&handler, &session, &exec, n)).unwrap();
        }
        while handler.active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let release = {
            let handler = handler.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                handler.gate.notify_one();
            })
        };
        let report = pool.shutdown(Duration::from_millis(150)).await;
        release.await.unwrap();

        // task 0 was running and finished; the other nine were cancelled
        assert!(!report.graceful);
        assert_eq!(report.unfinished_workers, 0);
        assert_eq!(report.counts.executed, 1);
        assert_eq!(report.counts.cancelled, 9);
        assert_eq!(report.counts.settled(), 10);
        assert_eq!(*handler.order.lock(), vec![0]);
        assert_eq!(sequencer.state(), SequencerState::Idle);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fails() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::default());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        pool.shutdown(Duration::from_secs(1)).await;

        let err = sequencer
            .enqueue(task(&handler, &session, &exec, 1))
            .unwrap_err();
        assert_eq!(err, DispatchError::PoolClosed);
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert_eq!(sequencer.pending(), 0);

        let counts = pool.counts();
        assert_eq!(counts.rejected, 1);
        assert_eq!(counts.settled(), 1);
    }

    #[tokio::test]
    async fn pool_closing_before_drain_submit_refuses_only_that_task() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::default());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        let closer = pool.clone();
        *sequencer.inner.before_submit.lock() = Some(Box::new(move || closer.close()));

        let err = sequencer
            .enqueue(task(&handler, &session, &exec, 1))
            .unwrap_err();
        assert_eq!(err, DispatchError::PoolClosed);
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert_eq!(sequencer.pending(), 0);
        assert_eq!(pool.counts().rejected, 1);
        assert_eq!(pool.counts().jobs, 0);

        // the next producer sees the closed pool before it appends
        let err = sequencer
            .enqueue(task(&handler, &session, &exec, 2))
            .unwrap_err();
        assert_eq!(err, DispatchError::PoolClosed);
        assert_eq!(sequencer.pending(), 0);

        let report = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.counts.rejected, 2);
        assert_eq!(report.counts.settled(), 2);
        assert!(handler.order.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn accepted_tasks_run_during_graceful_shutdown() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 2)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::gated());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        sequencer.enqueue(task(&handler, &session, &exec, 0)).unwrap();
        while handler.active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for n in 1..6 {
            sequencer.enqueue(task(&handler, &session, &exec, n)).unwrap();
        }

        let release = {
            let handler = handler.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                handler.gate.notify_one();
            })
        };
        let report = pool.shutdown(Duration::from_secs(5)).await;
        release.await.unwrap();

        assert!(report.graceful);
        assert_eq!(report.counts.executed, 6);
        assert_eq!(report.counts.settled(), 6);
        assert_eq!(*handler.order.lock(), (0..6).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancelled_drain_discards_pending_and_resets() {
        let pool = WorkerPool::spawn(PoolConfig::new("logic", 1)).unwrap();
        let sequencer = Sequencer::new(pool.clone());
        let handler = Arc::new(Recorder::default());
        let session: SessionRef = Arc::new(MemorySession::new());
        let exec = execution();

        sequencer.inner.queue.lock().push_back(task(&handler, &session, &exec, 1));
        sequencer.inner.queue.lock().push_back(task(&handler, &session, &exec, 2));
        sequencer.inner.state.store(SCHEDULED, Ordering::Release);

        let discarded = Box::new(Drain(sequencer.clone())).cancel();
        assert_eq!(discarded, 2);
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert_eq!(sequencer.pending(), 0);
        assert!(handler.order.lock().is_empty());

        pool.shutdown(Duration::from_secs(1)).await;
    }
}
