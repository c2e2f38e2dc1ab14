//! `rust-data-history` merges periodically-refreshed CSV extracts into versioned history tables.
//!
//! Each dataset gets a historical relation `dat_<dataset>` with type-2 history: every business
//! key has exactly one current version, and superseded versions are kept with the day (or
//! instant) they stopped being current. Newly inserted versions are also mirrored into one shared
//! master relation, `dat_master`, with a point geometry derived from the dataset's latitude and
//! longitude columns.
//!
//! The primary entrypoint is [`merge::MergeEngine`]:
//!
//! - [`merge::MergeEngine::initialize`]: create the historical relation from a sample extract
//! - [`merge::MergeEngine::ingest`]: first-load pipeline (insert unseen keys)
//! - [`merge::MergeEngine::refresh`]: incremental pipeline (insert unseen keys, supersede changed
//!   ones)
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rust_data_history::descriptor::DatasetDescriptor;
//! use rust_data_history::ingestion::BytesExtract;
//! use rust_data_history::merge::MergeEngine;
//! use rust_data_history::store::Database;
//!
//! # fn main() -> Result<(), rust_data_history::MergeError> {
//! let db = Arc::new(Database::new());
//! let engine = MergeEngine::new(Arc::clone(&db));
//! let potholes = DatasetDescriptor::new("potholes311", ["request_id"])
//!     .with_coordinates("latitude", "longitude");
//!
//! let first = BytesExtract::new(
//!     "potholes-2014-01-01.csv",
//!     "request_id,status,latitude,longitude\nA,open,41.8781,-87.6298\nB,open,,\n",
//! );
//! let report = engine.ingest(&potholes, &first)?;
//! assert_eq!(report.new_records, 2);
//!
//! let second = BytesExtract::new(
//!     "potholes-2014-01-02.csv",
//!     "request_id,status,latitude,longitude\nA,closed,41.8781,-87.6298\nB,open,,\n",
//! );
//! let report = engine.refresh(&potholes, &second)?;
//! assert_eq!(report.changed_records, 1);
//! assert_eq!(db.require("dat_potholes311")?.row_count(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`merge`]: the pipeline stages and [`merge::MergeEngine`]
//! - [`store`]: the in-process relational sink, with transactions and sequences
//! - [`processing`]: set-based operators the stages are written in
//! - [`ingestion`]: extract sources, CSV parsing, and type inference
//! - [`descriptor`], [`config`]: what to merge and how
//! - [`execution`]: running many datasets' merges in parallel
//! - [`observability`]: run outcome observers
//! - [`types`], [`geometry`], [`error`]: shared data types

pub mod config;
pub mod descriptor;
pub mod error;
pub mod execution;
pub mod geometry;
pub mod ingestion;
pub mod merge;
pub mod observability;
pub mod processing;
pub mod store;
pub mod types;

pub use config::{MergeConfig, MergeOptions};
pub use descriptor::DatasetDescriptor;
pub use error::{MergeError, MergeResult};
pub use merge::{MergeEngine, RunMode, RunReport};
