//! Run outcome observers.
//!
//! The engine reports every `ingest`/`refresh` outcome to an optional [`MergeObserver`]. Stage-level
//! progress is logged through `tracing`; observers see one callback per run.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::merge::{RunMode, RunReport};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal, e.g. a run that lost a race and can be retried).
    Warning,
    /// Error-level event (run failed).
    Error,
    /// Critical error (I/O failures and rolled-back writes).
    Critical,
}

/// Context about a merge run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Dataset being merged.
    pub dataset: String,
    /// Which pipeline ran.
    pub mode: RunMode,
    /// Reference of the extract (path or caller-supplied label).
    pub extract: String,
}

/// Observer interface for merge run outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait MergeObserver: Send + Sync {
    /// Called when a run succeeds.
    fn on_success(&self, _ctx: &RunContext, _report: &RunReport) {}

    /// Called when a run fails.
    fn on_failure(&self, _ctx: &RunContext, _severity: Severity, _error: &MergeError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn MergeObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn MergeObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl MergeObserver for CompositeObserver {
    fn on_success(&self, ctx: &RunContext, report: &RunReport) {
        for o in &self.observers {
            o.on_success(ctx, report);
        }
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Logs run outcomes to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl MergeObserver for StdErrObserver {
    fn on_success(&self, ctx: &RunContext, report: &RunReport) {
        eprintln!(
            "[merge][ok] mode={:?} dataset={} extract={} {}",
            ctx.mode, ctx.dataset, ctx.extract, report
        );
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        eprintln!(
            "[merge][{:?}] mode={:?} dataset={} extract={} err={}",
            severity, ctx.mode, ctx.dataset, ctx.extract, error
        );
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        eprintln!(
            "[ALERT][merge][{:?}] mode={:?} dataset={} extract={} err={}",
            severity, ctx.mode, ctx.dataset, ctx.extract, error
        );
    }
}

/// Appends run outcomes to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl MergeObserver for FileObserver {
    fn on_success(&self, ctx: &RunContext, report: &RunReport) {
        self.append_line(&format!(
            "{} ok mode={:?} dataset={} extract={} {}",
            unix_ts(),
            ctx.mode,
            ctx.dataset,
            ctx.extract,
            report
        ));
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        self.append_line(&format!(
            "{} fail severity={:?} mode={:?} dataset={} extract={} err={}",
            unix_ts(),
            severity,
            ctx.mode,
            ctx.dataset,
            ctx.extract,
            error
        ));
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &MergeError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} mode={:?} dataset={} extract={} err={}",
            unix_ts(),
            severity,
            ctx.mode,
            ctx.dataset,
            ctx.extract,
            error
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
