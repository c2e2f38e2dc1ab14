use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::types::{DataSet, Schema, Value};

use super::{Database, Table};

/// Row selection for [`Transaction::update`].
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Column is null-safe equal to the value.
    Eq(String, Value),
    /// Integer column is one of the ids.
    InIds(String, HashSet<i64>),
    /// All predicates hold.
    And(Vec<Predicate>),
}

impl Predicate {
    fn compile(&self, schema: &Schema) -> MergeResult<Compiled<'_>> {
        let column = |name: &str| {
            schema.index_of(name).ok_or_else(|| {
                MergeError::schema_mismatch(format!("predicate column '{name}' not found"))
            })
        };
        Ok(match self {
            Self::Eq(name, value) => Compiled::Eq(column(name)?, value),
            Self::InIds(name, ids) => Compiled::InIds(column(name)?, ids),
            Self::And(parts) => Compiled::And(
                parts
                    .iter()
                    .map(|p| p.compile(schema))
                    .collect::<MergeResult<_>>()?,
            ),
        })
    }
}

enum Compiled<'a> {
    Eq(usize, &'a Value),
    InIds(usize, &'a HashSet<i64>),
    And(Vec<Compiled<'a>>),
}

impl Compiled<'_> {
    fn matches(&self, row: &[Value]) -> bool {
        match self {
            Self::Eq(idx, value) => row[*idx].same_as(value),
            Self::InIds(idx, ids) => row[*idx].as_i64().is_some_and(|id| ids.contains(&id)),
            Self::And(parts) => parts.iter().all(|p| p.matches(row)),
        }
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Append {
        table: String,
        rows: Vec<Vec<Value>>,
    },
    Update {
        table: String,
        predicate: Predicate,
        assignments: Vec<(String, Value)>,
    },
}

impl WriteOp {
    fn table(&self) -> &str {
        match self {
            Self::Append { table, .. } | Self::Update { table, .. } => table,
        }
    }

    fn apply(&self, data: &mut DataSet) -> MergeResult<usize> {
        match self {
            Self::Append { table, rows } => {
                let width = data.schema.len();
                if let Some(bad) = rows.iter().find(|r| r.len() != width) {
                    return Err(MergeError::schema_mismatch(format!(
                        "row of width {} appended to '{table}' of width {width}",
                        bad.len()
                    )));
                }
                data.rows.extend(rows.iter().cloned());
                Ok(rows.len())
            }
            Self::Update {
                predicate,
                assignments,
                ..
            } => {
                let compiled = predicate.compile(&data.schema)?;
                let targets = assignments
                    .iter()
                    .map(|(name, value)| {
                        data.schema
                            .index_of(name)
                            .map(|idx| (idx, value))
                            .ok_or_else(|| {
                                MergeError::schema_mismatch(format!(
                                    "assignment column '{name}' not found"
                                ))
                            })
                    })
                    .collect::<MergeResult<Vec<_>>>()?;

                let mut touched = 0;
                for row in data.rows.iter_mut().filter(|r| compiled.matches(r)) {
                    for (idx, value) in &targets {
                        row[*idx] = (**value).clone();
                    }
                    touched += 1;
                }
                Ok(touched)
            }
        }
    }
}

/// A unit of work against a [`Database`].
///
/// Reads return a private working copy that reflects the transaction's own writes. Writes are
/// logged and replayed against the latest committed relations at [`Transaction::commit`], all or
/// nothing. Every relation read through [`Transaction::read`] is validated at commit: if another
/// transaction committed to it in the meantime, the commit fails with [`MergeError::Conflict`].
///
/// Dropping a transaction without committing discards it.
pub struct Transaction<'db> {
    db: &'db Database,
    owner: String,
    read_versions: HashMap<String, u64>,
    working: HashMap<String, DataSet>,
    ops: Vec<WriteOp>,
}

impl<'db> Transaction<'db> {
    pub(super) fn new(db: &'db Database, owner: &str) -> Self {
        Self {
            db,
            owner: owner.to_string(),
            read_versions: HashMap::new(),
            working: HashMap::new(),
            ops: Vec::new(),
        }
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// The dataset this transaction merges.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Read a relation, including this transaction's uncommitted writes.
    pub fn read(&mut self, name: &str) -> MergeResult<&DataSet> {
        if !self.read_versions.contains_key(name) {
            let snapshot = self.db.require(name)?;
            self.read_versions.insert(name.to_string(), snapshot.version);
            if !self.working.contains_key(name) {
                self.working.insert(name.to_string(), snapshot.data.clone());
            }
        }
        self.working
            .get(name)
            .ok_or_else(|| MergeError::UnknownRelation {
                name: name.to_string(),
            })
    }

    /// Append fully-formed rows to a relation.
    pub fn append(&mut self, table: &str, rows: Vec<Vec<Value>>) -> MergeResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let op = WriteOp::Append {
            table: table.to_string(),
            rows,
        };
        self.log(op)
    }

    /// Assign `assignments` to every row matching `predicate`.
    ///
    /// Returns the number of rows touched in this transaction's view.
    pub fn update(
        &mut self,
        table: &str,
        predicate: Predicate,
        assignments: Vec<(String, Value)>,
    ) -> MergeResult<usize> {
        let op = WriteOp::Update {
            table: table.to_string(),
            predicate,
            assignments,
        };
        self.log(op)
    }

    fn log(&mut self, op: WriteOp) -> MergeResult<usize> {
        if !self.working.contains_key(op.table()) {
            // Written but not read: keep a private copy so counts and later reads see the write,
            // without enrolling the relation in conflict validation.
            let snapshot = self.db.require(op.table())?;
            self.working
                .insert(op.table().to_string(), snapshot.data.clone());
        }
        let data = self
            .working
            .get_mut(op.table())
            .ok_or_else(|| MergeError::UnknownRelation {
                name: op.table().to_string(),
            })?;
        let touched = op.apply(data)?;
        self.ops.push(op);
        Ok(touched)
    }

    /// Number of logged write operations.
    pub fn pending_writes(&self) -> usize {
        self.ops.len()
    }

    /// Validate and apply every logged write atomically.
    pub fn commit(self) -> MergeResult<()> {
        let mut tables = self
            .db
            .tables()
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (name, seen) in &self.read_versions {
            let current = tables.get(name).ok_or_else(|| MergeError::Conflict {
                dataset: self.owner.clone(),
                message: format!("relation '{name}' was dropped during the transaction"),
            })?;
            if current.version != *seen {
                return Err(MergeError::Conflict {
                    dataset: self.owner.clone(),
                    message: format!(
                        "relation '{name}' changed during the transaction (version {seen} -> {})",
                        current.version
                    ),
                });
            }
        }

        let mut staged: HashMap<String, Table> = HashMap::new();
        for op in &self.ops {
            let name = op.table();
            if !staged.contains_key(name) {
                let current = tables.get(name).ok_or_else(|| MergeError::UnknownRelation {
                    name: name.to_string(),
                })?;
                staged.insert(name.to_string(), (**current).clone());
            }
            if let Some(table) = staged.get_mut(name) {
                op.apply(&mut table.data)?;
            }
        }

        for (name, mut table) in staged {
            table.version += 1;
            tables.insert(name, Arc::new(table));
        }
        debug!(owner = %self.owner, writes = self.ops.len(), "committed transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::Predicate;
    use crate::error::MergeError;
    use crate::store::Database;
    use crate::types::{DataType, Field, Schema, Value};

    fn db_with(name: &str) -> Database {
        let db = Database::new();
        db.create_table(
            name,
            Schema::new(vec![
                Field::new("row_id", DataType::Int64),
                Field::new("current_flag", DataType::Bool),
            ]),
        )
        .unwrap();
        db
    }

    fn row(id: i64, current: bool) -> Vec<Value> {
        vec![Value::Int64(id), Value::Bool(current)]
    }

    #[test]
    fn reads_see_own_writes_but_others_do_not_until_commit() {
        let db = db_with("dat_x");
        let mut tx = db.begin("x");
        tx.append("dat_x", vec![row(1, true)]).unwrap();
        assert_eq!(tx.read("dat_x").unwrap().row_count(), 1);
        assert_eq!(db.require("dat_x").unwrap().row_count(), 0);

        tx.commit().unwrap();
        assert_eq!(db.require("dat_x").unwrap().row_count(), 1);
    }

    #[test]
    fn dropping_a_transaction_rolls_back() {
        let db = db_with("dat_x");
        {
            let mut tx = db.begin("x");
            tx.append("dat_x", vec![row(1, true)]).unwrap();
        }
        assert_eq!(db.require("dat_x").unwrap().row_count(), 0);
    }

    #[test]
    fn update_touches_matching_rows_only() {
        let db = db_with("dat_x");
        let mut tx = db.begin("x");
        tx.append("dat_x", vec![row(1, true), row(2, true)]).unwrap();
        let touched = tx
            .update(
                "dat_x",
                Predicate::And(vec![
                    Predicate::InIds("row_id".into(), HashSet::from([2, 3])),
                    Predicate::Eq("current_flag".into(), Value::Bool(true)),
                ]),
                vec![("current_flag".into(), Value::Bool(false))],
            )
            .unwrap();
        assert_eq!(touched, 1);
        tx.commit().unwrap();
        assert_eq!(
            db.require("dat_x").unwrap().data().rows,
            vec![row(1, true), row(2, false)]
        );
    }

    #[test]
    fn racing_writers_on_a_read_relation_conflict() {
        let db = db_with("dat_x");

        let mut first = db.begin("x");
        let mut second = db.begin("x");
        first.read("dat_x").unwrap();
        second.read("dat_x").unwrap();
        first.append("dat_x", vec![row(1, true)]).unwrap();
        second.append("dat_x", vec![row(2, true)]).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, MergeError::Conflict { ref dataset, .. } if dataset == "x"));
        assert_eq!(db.require("dat_x").unwrap().row_count(), 1);
    }

    #[test]
    fn blind_appends_to_a_shared_relation_do_not_conflict() {
        let db = db_with("dat_master");

        let mut a = db.begin("a");
        let mut b = db.begin("b");
        a.append("dat_master", vec![row(1, true)]).unwrap();
        b.append("dat_master", vec![row(2, true)]).unwrap();
        a.commit().unwrap();
        b.commit().unwrap();

        assert_eq!(db.require("dat_master").unwrap().row_count(), 2);
    }

    #[test]
    fn failed_replay_applies_nothing() {
        let db = db_with("dat_x");
        let mut tx = db.begin("x");
        tx.append("dat_x", vec![row(1, true)]).unwrap();
        db.drop_table_if_exists("dat_x");
        db.create_table("dat_x", Schema::new(vec![Field::new("other", DataType::Int64)]))
            .unwrap();
        assert!(tx.commit().is_err());
        assert_eq!(db.require("dat_x").unwrap().row_count(), 0);
    }
}
