//! Batch execution of merge runs across datasets.
//!
//! This module sits "above" [`crate::merge`] and provides:
//!
//! - Parallel execution of many datasets' runs on a dedicated `rayon` pool
//! - A bound on concurrently executing runs
//! - Real-time metrics + observer hooks for monitoring
//!
//! Jobs for the same dataset run one after another in submission order, so a batch may carry an
//! `Ingest` followed by a `Refresh` of one dataset.

mod observer;
mod semaphore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::debug;

use crate::descriptor::DatasetDescriptor;
use crate::error::MergeResult;
use crate::ingestion::ExtractSource;
use crate::merge::{MergeEngine, RunMode, RunReport};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver,
    StdErrExecutionObserver,
};

use semaphore::Semaphore;

/// One run to execute: which dataset, which extract, which pipeline.
#[derive(Clone)]
pub struct MergeJob {
    pub descriptor: DatasetDescriptor,
    pub extract: Arc<dyn ExtractSource>,
    pub mode: RunMode,
}

impl MergeJob {
    pub fn new(
        descriptor: DatasetDescriptor,
        extract: Arc<dyn ExtractSource>,
        mode: RunMode,
    ) -> Self {
        Self {
            descriptor,
            extract,
            mode,
        }
    }
}

impl std::fmt::Debug for MergeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeJob")
            .field("dataset", &self.descriptor.dataset_name)
            .field("extract", &self.extract.reference())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Configuration for the [`BatchExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on concurrently executing runs.
    ///
    /// This is an additional throttle on top of `num_threads`.
    pub max_in_flight_runs: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = available_parallelism();
        Self {
            num_threads: Some(n),
            max_in_flight_runs: n,
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runs batches of [`MergeJob`]s against a [`MergeEngine`].
pub struct BatchExecutor {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl BatchExecutor {
    /// Create an executor with its own thread pool.
    pub fn new(opts: ExecutionOptions) -> Result<Self, ThreadPoolBuildError> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(available_parallelism)
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("merge-batch-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Execute every job and return the outcomes in submission order.
    ///
    /// A failed run does not stop the batch; its error is returned in its slot.
    pub fn run_all(&self, engine: &MergeEngine, jobs: &[MergeJob]) -> Vec<MergeResult<RunReport>> {
        let start = Instant::now();
        self.metrics.begin_batch();
        self.emit(ExecutionEvent::BatchStarted { jobs: jobs.len() });

        let lanes = lanes_by_dataset(jobs);
        let sem = Semaphore::new(self.opts.max_in_flight_runs);

        let finished: Vec<(usize, MergeResult<RunReport>)> = self.pool.install(|| {
            lanes
                .into_par_iter()
                .flat_map_iter(|lane| {
                    lane.into_iter()
                        .map(|idx| (idx, self.run_one(engine, &jobs[idx], &sem)))
                        .collect::<Vec<_>>()
                })
                .collect()
        });

        let mut slots: Vec<Option<MergeResult<RunReport>>> = jobs.iter().map(|_| None).collect();
        for (idx, outcome) in finished {
            slots[idx] = Some(outcome);
        }

        self.metrics.end_batch(start.elapsed());
        let metrics = self.metrics.snapshot();
        debug!(%metrics, "batch finished");
        self.emit(ExecutionEvent::BatchFinished {
            elapsed: start.elapsed(),
            metrics,
        });

        slots.into_iter().flatten().collect()
    }

    fn run_one(
        &self,
        engine: &MergeEngine,
        job: &MergeJob,
        sem: &Semaphore,
    ) -> MergeResult<RunReport> {
        let dataset = job.descriptor.dataset_name.clone();
        let (_permit, waited) = sem.acquire();
        if !waited.is_zero() {
            self.metrics.on_throttle_wait(waited);
            self.emit(ExecutionEvent::ThrottleWaited {
                dataset: dataset.clone(),
                duration: waited,
            });
        }

        let started = Instant::now();
        self.metrics.on_run_start();
        self.emit(ExecutionEvent::RunStarted {
            dataset: dataset.clone(),
            mode: job.mode,
        });

        let outcome = engine.run(job.mode, &job.descriptor, job.extract.as_ref());
        match &outcome {
            Ok(report) => self.metrics.on_run_success(
                report.staged_rows,
                report.new_records,
                report.changed_records,
            ),
            Err(_) => self.metrics.on_run_failure(),
        }
        self.emit(ExecutionEvent::RunFinished {
            dataset,
            mode: job.mode,
            elapsed: started.elapsed(),
            error: outcome.as_ref().err().map(ToString::to_string),
        });
        outcome
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Group job indexes by dataset, keeping submission order within and across groups.
fn lanes_by_dataset(jobs: &[MergeJob]) -> Vec<Vec<usize>> {
    let mut lane_of: HashMap<&str, usize> = HashMap::new();
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    for (idx, job) in jobs.iter().enumerate() {
        let lane = *lane_of
            .entry(job.descriptor.dataset_name.as_str())
            .or_insert_with(|| {
                lanes.push(Vec::new());
                lanes.len() - 1
            });
        lanes[lane].push(idx);
    }
    lanes
}
