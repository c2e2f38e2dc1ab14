use std::sync::{Arc, Mutex};

use rust_data_history::config::MergeOptions;
use rust_data_history::descriptor::DatasetDescriptor;
use rust_data_history::error::MergeError;
use rust_data_history::ingestion::{BytesExtract, FileExtract};
use rust_data_history::merge::{MergeEngine, RunMode, RunReport};
use rust_data_history::observability::{
    CompositeObserver, FileObserver, MergeObserver, RunContext, Severity,
};
use rust_data_history::store::Database;

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<(RunMode, usize)>>,
    failures: Mutex<Vec<Severity>>,
    alerts: Mutex<Vec<Severity>>,
}

impl MergeObserver for RecordingObserver {
    fn on_success(&self, _ctx: &RunContext, report: &RunReport) {
        self.successes
            .lock()
            .unwrap()
            .push((report.mode, report.new_records));
    }

    fn on_failure(&self, _ctx: &RunContext, severity: Severity, _error: &MergeError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _ctx: &RunContext, severity: Severity, _error: &MergeError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

fn potholes() -> DatasetDescriptor {
    DatasetDescriptor::new("potholes311", ["request_id"])
}

fn engine_with(observer: Arc<dyn MergeObserver>, alert_at_or_above: Severity) -> MergeEngine {
    MergeEngine::with_options(
        Arc::new(Database::new()),
        MergeOptions {
            observer: Some(observer),
            alert_at_or_above,
            ..Default::default()
        },
    )
}

#[test]
fn observer_sees_one_callback_per_run() {
    let obs = Arc::new(RecordingObserver::default());
    let engine = engine_with(obs.clone(), Severity::Critical);

    engine
        .initialize(&potholes(), &BytesExtract::new("a.csv", "request_id\nA\n"))
        .unwrap();
    engine
        .ingest(&potholes(), &BytesExtract::new("a.csv", "request_id\nA\nB\n"))
        .unwrap();

    assert_eq!(
        *obs.successes.lock().unwrap(),
        vec![(RunMode::Initialize, 0), (RunMode::Ingest, 2)]
    );
    assert!(obs.failures.lock().unwrap().is_empty());
}

#[test]
fn failures_below_the_threshold_are_not_alerts() {
    let obs = Arc::new(RecordingObserver::default());
    let engine = engine_with(obs.clone(), Severity::Critical);
    engine
        .ingest(&potholes(), &BytesExtract::new("a.csv", "request_id,n\nA,1\n"))
        .unwrap();

    let _ = engine.refresh(&potholes(), &BytesExtract::new("b.csv", "request_id,n\nA,x\n"));

    assert_eq!(*obs.failures.lock().unwrap(), vec![Severity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[test]
fn critical_failures_raise_alerts() {
    let obs = Arc::new(RecordingObserver::default());
    let engine = engine_with(obs.clone(), Severity::Critical);
    let dir = tempfile::tempdir().unwrap();

    let _ = engine.ingest(&potholes(), &FileExtract::new(dir.path().join("nope.csv")));

    assert!(obs.failures.lock().unwrap().is_empty());
    assert_eq!(*obs.alerts.lock().unwrap(), vec![Severity::Critical]);
}

#[test]
fn file_and_composite_observers_record_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("merge.log");
    let recording = Arc::new(RecordingObserver::default());
    let observers: Vec<Arc<dyn MergeObserver>> =
        vec![Arc::new(FileObserver::new(&log)), recording.clone()];
    let composite = CompositeObserver::new(observers);
    let engine = engine_with(Arc::new(composite), Severity::Error);

    engine
        .ingest(&potholes(), &BytesExtract::new("day1.csv", "request_id\nA\n"))
        .unwrap();
    let _ = engine.ingest(
        &DatasetDescriptor::new("potholes311", ["request_id"]),
        &BytesExtract::new("day2.csv", "request_id,extra\nB,1\n"),
    );

    let text = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(" ok mode=Ingest dataset=potholes311 extract=day1.csv"));
    assert!(lines[1].contains("ALERT severity=Error"));
    assert!(lines[1].contains("schema mismatch"));
    assert_eq!(*recording.alerts.lock().unwrap(), vec![Severity::Error]);
}
