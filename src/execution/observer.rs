use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::merge::RunMode;

/// Events emitted by the [`super::BatchExecutor`].
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    BatchStarted {
        jobs: usize,
    },
    ThrottleWaited {
        dataset: String,
        duration: Duration,
    },
    RunStarted {
        dataset: String,
        mode: RunMode,
    },
    RunFinished {
        dataset: String,
        mode: RunMode,
        elapsed: Duration,
        /// Rendered error if the run failed.
        error: Option<String>,
    },
    BatchFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// A simple stderr logger for execution events.
#[derive(Debug, Default)]
pub struct StdErrExecutionObserver;

impl ExecutionObserver for StdErrExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        eprintln!("{event:?}");
    }
}

/// Real-time counters for a batch.
///
/// The executor updates these while runs execute; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    batch_id: AtomicU64,
    elapsed_ns: AtomicU64,

    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    rows_staged: AtomicU64,
    records_inserted: AtomicU64,
    records_superseded: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_runs: AtomicUsize,
    max_active_runs: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_batch(&self) {
        self.batch_id.fetch_add(1, Ordering::SeqCst);
        for counter in [
            &self.elapsed_ns,
            &self.runs_started,
            &self.runs_succeeded,
            &self.runs_failed,
            &self.rows_staged,
            &self.records_inserted,
            &self.records_superseded,
            &self.throttle_wait_ns,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.active_runs.store(0, Ordering::SeqCst);
        self.max_active_runs.store(0, Ordering::SeqCst);
    }

    pub fn end_batch(&self, elapsed: Duration) {
        self.elapsed_ns.store(nanos(elapsed), Ordering::SeqCst);
    }

    pub fn on_run_start(&self) {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_runs.fetch_max(now, Ordering::SeqCst);
    }

    pub fn on_run_success(&self, staged: usize, inserted: usize, superseded: usize) {
        self.runs_succeeded.fetch_add(1, Ordering::SeqCst);
        self.rows_staged.fetch_add(staged as u64, Ordering::SeqCst);
        self.records_inserted.fetch_add(inserted as u64, Ordering::SeqCst);
        self.records_superseded.fetch_add(superseded as u64, Ordering::SeqCst);
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::SeqCst);
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        self.throttle_wait_ns.fetch_add(nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            batch_id: self.batch_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            runs_started: self.runs_started.load(Ordering::SeqCst),
            runs_succeeded: self.runs_succeeded.load(Ordering::SeqCst),
            runs_failed: self.runs_failed.load(Ordering::SeqCst),
            rows_staged: self.rows_staged.load(Ordering::SeqCst),
            records_inserted: self.records_inserted.load(Ordering::SeqCst),
            records_superseded: self.records_superseded.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_runs: self.max_active_runs.load(Ordering::SeqCst),
        }
    }
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub batch_id: u64,
    pub elapsed: Option<Duration>,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub rows_staged: u64,
    pub records_inserted: u64,
    pub records_superseded: u64,
    pub throttle_wait: Duration,
    pub max_active_runs: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_id={}, runs={}/{} (failed={}), rows_staged={}, inserted={}, superseded={}, max_active_runs={}, throttle_wait={:?}, elapsed={:?}",
            self.batch_id,
            self.runs_succeeded,
            self.runs_started,
            self.runs_failed,
            self.rows_staged,
            self.records_inserted,
            self.records_superseded,
            self.max_active_runs,
            self.throttle_wait,
            self.elapsed
        )
    }
}
