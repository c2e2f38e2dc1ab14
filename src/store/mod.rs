//! In-process relational sink.
//!
//! [`Database`] holds named [`Table`]s, per-table surrogate-key sequences and per-dataset run
//! locks, and hands out [`Transaction`]s. Readers always get an immutable snapshot (`Arc<Table>`); writers either
//! replace a relation wholesale ([`Database::put_table`], used for ephemeral relations) or go
//! through a transaction that is applied atomically at commit.

mod table;
mod transaction;

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::types::{DataSet, Schema};

pub use table::Table;
pub use transaction::{Predicate, Transaction};

/// A catalog of named relations.
#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<HashMap<String, Arc<Table>>>,
    sequences: Mutex<HashMap<String, i64>>,
    active_runs: Mutex<HashSet<String>>,
}

/// A dataset's run lock, released on drop.
#[derive(Debug)]
pub struct RunGuard<'db> {
    active_runs: &'db Mutex<HashSet<String>>,
    dataset: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.dataset);
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty relation. Fails if one with the same name exists.
    pub fn create_table(&self, name: &str, schema: Schema) -> MergeResult<()> {
        if self.create_table_if_absent(name, schema) {
            Ok(())
        } else {
            Err(MergeError::schema_mismatch(format!(
                "relation '{name}' already exists"
            )))
        }
    }

    /// Create an empty relation unless one with the same name exists.
    ///
    /// Returns `true` if the relation was created. An existing relation is left untouched even
    /// if its schema differs.
    pub fn create_table_if_absent(&self, name: &str, schema: Schema) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(name) {
            return false;
        }
        tables.insert(
            name.to_string(),
            Arc::new(Table::new(name, DataSet::empty(schema), 1)),
        );
        debug!(relation = name, "created relation");
        true
    }

    /// Drop and recreate `name` with the given contents.
    pub fn put_table(&self, name: &str, data: DataSet) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let version = tables.get(name).map_or(1, |t| t.version + 1);
        tables.insert(name.to_string(), Arc::new(Table::new(name, data, version)));
    }

    /// Snapshot of a relation, if it exists.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Snapshot of a relation that must exist.
    pub fn require(&self, name: &str) -> MergeResult<Arc<Table>> {
        self.table(name).ok_or_else(|| MergeError::UnknownRelation {
            name: name.to_string(),
        })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Drop a relation and its sequence. Dropping a missing relation is not an error.
    ///
    /// Returns `true` if something was dropped.
    pub fn drop_table_if_exists(&self, name: &str) -> bool {
        let dropped = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        self.sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if dropped {
            debug!(relation = name, "dropped relation");
        }
        dropped
    }

    /// Names of all relations, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Reserve `count` surrogate ids from the sequence of `name`.
    ///
    /// Sequences start at 1, only move forward, and are not rolled back with a transaction, so an
    /// id is never handed out twice.
    pub fn allocate_ids(&self, name: &str, count: usize) -> Range<i64> {
        let mut sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
        let next = sequences.entry(name.to_string()).or_insert(1);
        let start = *next;
        *next += count as i64;
        start..*next
    }

    /// Claim `dataset` for one run.
    ///
    /// A dataset's ephemeral relations are shared by every engine on this database, so at most
    /// one run per dataset may hold them. A second claim fails with [`MergeError::Conflict`]
    /// until the first guard is dropped.
    pub fn lock_dataset(&self, dataset: &str) -> MergeResult<RunGuard<'_>> {
        let mut active = self.active_runs.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(dataset.to_string()) {
            return Err(MergeError::Conflict {
                dataset: dataset.to_string(),
                message: "another run of this dataset is in progress".to_string(),
            });
        }
        debug!(dataset, "run lock acquired");
        Ok(RunGuard {
            active_runs: &self.active_runs,
            dataset: dataset.to_string(),
        })
    }

    /// Begin a transaction on behalf of `owner` (the dataset being merged).
    pub fn begin(&self, owner: &str) -> Transaction<'_> {
        Transaction::new(self, owner)
    }

    pub(crate) fn tables(&self) -> &RwLock<HashMap<String, Arc<Table>>> {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::Int64)])
    }

    #[test]
    fn create_if_absent_never_replaces() {
        let db = Database::new();
        assert!(db.create_table_if_absent("dat_x", schema()));
        db.put_table(
            "dat_x",
            DataSet::new(schema(), vec![vec![Value::Int64(1)]]),
        );
        assert!(!db.create_table_if_absent("dat_x", schema()));
        assert_eq!(db.require("dat_x").unwrap().row_count(), 1);
        assert!(db.create_table("dat_x", schema()).is_err());
    }

    #[test]
    fn drop_is_idempotent() {
        let db = Database::new();
        db.put_table("raw_x", DataSet::empty(schema()));
        assert!(db.drop_table_if_exists("raw_x"));
        assert!(!db.drop_table_if_exists("raw_x"));
        assert!(db.require("raw_x").is_err());
    }

    #[test]
    fn sequences_never_reuse_ids() {
        let db = Database::new();
        assert_eq!(db.allocate_ids("dat_x", 3), 1..4);
        assert_eq!(db.allocate_ids("dat_x", 0), 4..4);
        assert_eq!(db.allocate_ids("dat_x", 2), 4..6);
        assert_eq!(db.allocate_ids("dat_y", 1), 1..2);
    }

    #[test]
    fn dataset_lock_is_exclusive_until_released() {
        let db = Database::new();
        let guard = db.lock_dataset("potholes311").unwrap();
        assert!(db.lock_dataset("potholes311").unwrap_err().is_retryable());
        let other = db.lock_dataset("graffiti").unwrap();

        drop(guard);
        assert!(db.lock_dataset("potholes311").is_ok());
        drop(other);
    }

    #[test]
    fn put_table_bumps_version() {
        let db = Database::new();
        db.put_table("raw_x", DataSet::empty(schema()));
        let v1 = db.require("raw_x").unwrap().version();
        db.put_table("raw_x", DataSet::empty(schema()));
        assert!(db.require("raw_x").unwrap().version() > v1);
    }
}
