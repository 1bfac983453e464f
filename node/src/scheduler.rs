//! Two-lane task scheduler.
//!
//! - **Ordered**: one worker runs units strictly in submission order. Work
//!   that mutates the header chain or the wallet rule set goes here.
//! - **Parallel**: every unit is its own tokio task.
//!
//! Every unit returns `Result<(), TaskFault>`. Errors and panics are caught,
//! logged under the unit's name and written to the shared [`TaskLog`]; the
//! lane keeps running.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainwatch_types::Timestamp;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::tracing_spans::task_span;
use crate::{ListenerMetrics, TaskFault};

pub type TaskResult = Result<(), TaskFault>;

type BoxedUnit = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Ordered,
    Parallel,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordered => f.write_str("ordered"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// One recorded failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: String,
    /// `None` for failures raised outside the scheduler, e.g. by a feed
    /// consumer.
    pub lane: Option<Lane>,
    pub error: TaskFault,
    pub at: Timestamp,
}

struct FailureLog {
    last: Option<TaskFailure>,
    history: VecDeque<TaskFailure>,
}

/// Outcome bookkeeping shared by both lanes.
pub struct TaskLog {
    failures: Mutex<FailureLog>,
    capacity: usize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TaskLog {
    /// A log keeping the `capacity` most recent failures.
    pub fn new(capacity: usize) -> Self {
        Self {
            failures: Mutex::new(FailureLog {
                last: None,
                history: VecDeque::with_capacity(capacity),
            }),
            capacity,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, task: &str, lane: Option<Lane>, error: TaskFault) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let failure = TaskFailure {
            task: task.to_string(),
            lane,
            error,
            at: Timestamp::now(),
        };
        let mut log = self.failures.lock();
        if self.capacity > 0 {
            if log.history.len() == self.capacity {
                log.history.pop_front();
            }
            log.history.push_back(failure.clone());
        }
        log.last = Some(failure);
    }

    /// The most recent failure. Later failures overwrite earlier ones.
    pub fn last_error(&self) -> Option<TaskFailure> {
        self.failures.lock().last.clone()
    }

    /// Recent failures, oldest first.
    pub fn history(&self) -> Vec<TaskFailure> {
        self.failures.lock().history.iter().cloned().collect()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct TaskScheduler {
    ordered: Mutex<Option<mpsc::UnboundedSender<(&'static str, BoxedUnit)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
    log: Arc<TaskLog>,
    metrics: Arc<ListenerMetrics>,
}

impl TaskScheduler {
    /// Create the scheduler and spawn the ordered worker. Must be called
    /// from within a tokio runtime.
    pub fn start(log: Arc<TaskLog>, metrics: Arc<ListenerMetrics>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(&'static str, BoxedUnit)>();
        let stopping = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn({
            let stopping = Arc::clone(&stopping);
            let log = Arc::clone(&log);
            let metrics = Arc::clone(&metrics);
            async move {
                while let Some((name, unit)) = rx.recv().await {
                    if stopping.load(Ordering::Acquire) {
                        tracing::debug!(task = name, "discarding queued ordered task");
                        continue;
                    }
                    run_unit(name, Lane::Ordered, unit, &log, &metrics).await;
                }
                tracing::debug!("ordered worker exited");
            }
        });

        Self {
            ordered: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stopping,
            log,
            metrics,
        }
    }

    /// Queue `unit` on `lane`.
    pub fn schedule<F>(&self, name: &'static str, lane: Lane, unit: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        match lane {
            Lane::Ordered => {
                let ordered = self.ordered.lock();
                let accepted = match ordered.as_ref() {
                    Some(tx) => tx.send((name, Box::pin(unit))).is_ok(),
                    None => false,
                };
                if !accepted {
                    tracing::warn!(task = name, "ordered lane is shut down; task dropped");
                }
            }
            Lane::Parallel => {
                let log = Arc::clone(&self.log);
                let metrics = Arc::clone(&self.metrics);
                tokio::spawn(async move {
                    run_unit(name, Lane::Parallel, Box::pin(unit), &log, &metrics).await;
                });
            }
        }
    }

    pub fn log(&self) -> &Arc<TaskLog> {
        &self.log
    }

    /// Refuse further ordered units. Units already queued are discarded; the
    /// one currently running is left to finish.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.ordered.lock().take();
    }

    /// Wait up to `timeout` for the ordered worker to exit. Returns false on
    /// timeout. Call [`shutdown`](Self::shutdown) first.
    pub async fn join(&self, timeout: Duration) -> bool {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return true;
        };
        match tokio::time::timeout(timeout, worker).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "ordered worker did not finish in time"
                );
                false
            }
        }
    }
}

async fn run_unit(
    name: &'static str,
    lane: Lane,
    unit: BoxedUnit,
    log: &TaskLog,
    metrics: &ListenerMetrics,
) {
    // A separate task turns a panic into a `JoinError` instead of unwinding
    // through the worker.
    let outcome = match tokio::spawn(unit.instrument(task_span(name, lane))).await {
        Ok(result) => result,
        Err(e) => Err(join_fault(e)),
    };
    match outcome {
        Ok(()) => {
            log.record_success();
            metrics.tasks_completed.inc();
        }
        Err(fault) => {
            tracing::error!(task = name, lane = %lane, error = %fault, "task failed");
            log.record_failure(name, Some(lane), fault);
            metrics.tasks_failed.inc();
        }
    }
}

fn join_fault(e: JoinError) -> TaskFault {
    if !e.is_panic() {
        return TaskFault::Cancelled;
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    TaskFault::Panicked(message)
}

/// Run synchronous work on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, TaskFault>
where
    F: FnOnce() -> Result<T, TaskFault> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_fault)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode() -> TaskResult {
        panic!("kaboom")
    }

    fn scheduler(capacity: usize) -> (Arc<TaskLog>, TaskScheduler) {
        let log = Arc::new(TaskLog::new(capacity));
        let metrics = Arc::new(ListenerMetrics::new().expect("metrics"));
        (Arc::clone(&log), TaskScheduler::start(log, metrics))
    }

    #[tokio::test]
    async fn ordered_units_run_in_submission_order() {
        let (_, scheduler) = scheduler(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50u64 {
            let seen = Arc::clone(&seen);
            scheduler.schedule("append", Lane::Ordered, async move {
                // Earlier units sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_micros(50 - i)).await;
                seen.lock().push(i);
                Ok(())
            });
        }
        scheduler.shutdown_after_drain().await;
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn parallel_units_overlap() {
        let (log, scheduler) = scheduler(8);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let done_tx = done_tx.clone();
            scheduler.schedule("meet", Lane::Parallel, async move {
                barrier.wait().await;
                let _ = done_tx.send(());
                Ok(())
            });
        }
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
                .await
                .expect("both units ran concurrently");
        }
        assert!(log.last_error().is_none());
    }

    #[tokio::test]
    async fn failures_are_recorded_and_the_lane_continues() {
        let (log, scheduler) = scheduler(8);
        let ran_after = Arc::new(AtomicBool::new(false));
        scheduler.schedule("fails", Lane::Ordered, async {
            Err(TaskFault::Store("boom".into()))
        });
        scheduler.schedule("panics", Lane::Ordered, async { explode() });
        {
            let ran_after = Arc::clone(&ran_after);
            scheduler.schedule("after", Lane::Ordered, async move {
                ran_after.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        scheduler.shutdown_after_drain().await;

        assert!(ran_after.load(Ordering::SeqCst));
        let last = log.last_error().expect("failure recorded");
        assert_eq!(last.task, "panics");
        assert_eq!(last.lane, Some(Lane::Ordered));
        assert_eq!(last.error, TaskFault::Panicked("kaboom".into()));
        assert_eq!(log.history().len(), 2);
        assert_eq!(log.failed(), 2);
        // "after" plus the drain marker.
        assert_eq!(log.completed(), 2);
    }

    #[tokio::test]
    async fn ordered_lane_refuses_work_after_shutdown() {
        let (log, scheduler) = scheduler(8);
        scheduler.shutdown();
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            scheduler.schedule("late", Lane::Ordered, async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(scheduler.join(Duration::from_secs(1)).await);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(log.completed(), 0);
    }

    #[tokio::test]
    async fn in_flight_ordered_unit_finishes_during_shutdown() {
        let (log, scheduler) = scheduler(8);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        scheduler.schedule("slow", Lane::Ordered, async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        });
        started_rx.await.expect("unit started");
        scheduler.shutdown();
        assert!(scheduler.join(Duration::from_secs(2)).await);
        assert_eq!(log.completed(), 1);
    }

    #[test]
    fn history_is_bounded_and_last_error_wins() {
        let log = TaskLog::new(2);
        for i in 0..5 {
            log.record_failure(&format!("t{i}"), None, TaskFault::Cancelled);
        }
        let names: Vec<_> = log.history().into_iter().map(|f| f.task).collect();
        assert_eq!(names, vec!["t3", "t4"]);
        assert_eq!(log.last_error().map(|f| f.task), Some("t4".to_string()));
    }

    #[tokio::test]
    async fn blocking_work_reports_panics() {
        let ok = blocking(|| Ok(7)).await;
        assert_eq!(ok, Ok(7));
        let err = blocking::<(), _>(|| panic!("sync boom")).await;
        assert_eq!(err, Err(TaskFault::Panicked("sync boom".into())));
    }

    impl TaskScheduler {
        /// Queue a marker unit and wait for it, so everything queued before
        /// has run, then stop the lane.
        async fn shutdown_after_drain(&self) {
            let (tx, rx) = tokio::sync::oneshot::channel();
            self.schedule("drain", Lane::Ordered, async move {
                let _ = tx.send(());
                Ok(())
            });
            rx.await.expect("drain marker ran");
            self.shutdown();
            self.join(Duration::from_secs(2)).await;
        }
    }
}
