//! The merge engine.
//!
//! A run moves an extract through a fixed sequence of stages, each reading the relation(s) the
//! previous stage produced:
//!
//! 1. [`staging`]: bulk-load the extract into `raw_<dataset>` with a synthetic `dup_row_id`
//! 2. [`dedupe`]: keep the last occurrence of each business key (`dedupe_<dataset>`,
//!    `src_<dataset>`)
//! 3. [`delta`]: find keys never seen before (`new_<dataset>`)
//! 4. [`versioner`]: insert them as current versions of `dat_<dataset>`
//! 5. [`master`]: append the inserted versions to the shared master relation
//! 6. [`delta`] (refresh only): find current versions whose attributes changed
//!    (`chg_<dataset>`)
//! 7. [`versioner`] + [`master`] (refresh only): expire them, insert their replacements, and
//!    expire the matching master rows
//! 8. [`reaper`]: drop every ephemeral relation, whether the run succeeded or not
//!
//! Steps 3 to 7 run inside one transaction, so readers never see a business key with zero or two
//! current versions. [`MergeEngine`] wires the stages together.

pub mod dedupe;
pub mod delta;
mod engine;
pub mod history;
pub mod master;
pub mod names;
pub mod reaper;
pub mod staging;
pub mod versioner;

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::Schema;

pub use delta::Delta;
pub use engine::MergeEngine;
pub use history::HistoricalSchema;
pub use names::{RelationNames, MASTER_TABLE};

/// Which pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Create the historical table if needed; no records are merged.
    Initialize,
    /// First-load pipeline: insert keys never seen before.
    Ingest,
    /// Incremental pipeline: insert new keys and supersede changed ones.
    Refresh,
}

/// A relation produced by one stage and consumed by the next.
///
/// Stages hand each other the relation's name together with its schema instead of looking
/// shapes up in a shared registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub schema: Schema,
}

impl Relation {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub dataset: String,
    pub mode: RunMode,
    /// The run's timestamp; new versions start here.
    pub started_at: NaiveDateTime,
    /// Rows loaded into staging.
    pub staged_rows: usize,
    /// Rows left out of staging under [`crate::config::BadRowPolicy::Skip`].
    pub skipped_rows: usize,
    /// Distinct business keys after deduplication.
    pub unique_rows: usize,
    /// Keys inserted for the first time.
    pub new_records: usize,
    /// Current versions expired and replaced.
    pub changed_records: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "staged={} skipped={} unique={} new={} changed={}",
            self.staged_rows,
            self.skipped_rows,
            self.unique_rows,
            self.new_records,
            self.changed_records
        )
    }
}
