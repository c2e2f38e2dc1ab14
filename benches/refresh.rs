//! Refresh throughput: one day's extract merged over an already-ingested history.
//!
//! Run with:
//! ```
//! cargo bench --bench refresh
//! ```

use std::fmt::Write as _;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rust_data_history::descriptor::DatasetDescriptor;
use rust_data_history::ingestion::BytesExtract;
use rust_data_history::merge::MergeEngine;
use rust_data_history::store::Database;

/// Every `change_every`-th record gets a new status; the last tenth of the keys are new.
fn extract(records: usize, change_every: usize) -> String {
    let mut csv = String::from("request_id,status,ward,latitude,longitude\n");
    for i in 0..records {
        let status = if change_every > 0 && i % change_every == 0 {
            "closed"
        } else {
            "open"
        };
        let _ = writeln!(
            csv,
            "SR{i:07},{status},{},{:.4},{:.4}",
            i % 50,
            41.6 + (i % 1000) as f64 * 0.0005,
            -87.9 + (i % 700) as f64 * 0.0005
        );
    }
    csv
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    let descriptor = DatasetDescriptor::new("potholes311", ["request_id"])
        .with_coordinates("latitude", "longitude");

    for records in [1_000usize, 10_000] {
        let day1 = extract(records - records / 10, 0);
        let day2 = extract(records, 20);

        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::new("potholes", records), &records, |b, _| {
            b.iter_batched(
                || {
                    let engine = MergeEngine::new(Arc::new(Database::new()));
                    engine
                        .ingest(&descriptor, &BytesExtract::new("day1.csv", day1.as_str()))
                        .expect("seed history");
                    engine
                },
                |engine| {
                    black_box(
                        engine
                            .refresh(&descriptor, &BytesExtract::new("day2.csv", day2.as_str()))
                            .expect("refresh"),
                    )
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_refresh);
criterion_main!(benches);
