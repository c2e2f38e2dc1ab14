//! Delta detection against the historical relation.
//!
//! Both detections run inside the run's transaction so they see the versions inserted earlier in
//! the same run, and so the historical relation is validated at commit.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::processing::{anti_join, filter_eq, index_by_key, KeyColumns};
use crate::store::Transaction;
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::history::{HistoricalSchema, CURRENT_FLAG, DUP_ROW_ID, ROW_ID};
use super::names::RelationNames;
use super::Relation;

/// Column of `new_<dataset>` and `chg_<dataset>` holding the identifier to act on.
pub const ID: &str = "id";
/// Column of `chg_<dataset>` pointing at the `src_<dataset>` row with the new attribute values.
pub const SRC_ID: &str = "src_id";

/// Result of a detection: nothing to do, or a relation of identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Empty,
    Found { relation: Relation, count: usize },
}

impl Delta {
    fn from_relation(relation: Relation, count: usize) -> Self {
        if count == 0 {
            Self::Empty
        } else {
            Self::Found { relation, count }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Found { count, .. } => *count,
        }
    }
}

/// Keys of `src_<dataset>` never seen in the historical relation, in any version.
///
/// Writes `new_<dataset>(id)` with the `dup_row_id` of each such source row. The relation is
/// created even when empty.
pub fn find_new_records(
    tx: &mut Transaction<'_>,
    names: &RelationNames,
    src: &Relation,
    key: &[String],
) -> MergeResult<Delta> {
    let db = tx.database();
    let source = db.require(&src.name)?;
    let historical = tx.read(names.historical())?;

    let unseen = anti_join(source.data(), historical, key)?;
    let idx = unseen.schema.index_of(DUP_ROW_ID).ok_or_else(|| {
        MergeError::schema_mismatch(format!("'{}' lacks '{DUP_ROW_ID}'", src.name))
    })?;
    let rows: Vec<Vec<Value>> = unseen.rows.iter().map(|r| vec![r[idx].clone()]).collect();
    let count = rows.len();

    let schema = Schema::new(vec![Field::required(ID, DataType::Int64)]);
    db.put_table(names.new_records(), DataSet::new(schema.clone(), rows));
    debug!(relation = names.new_records(), count, "detected new records");

    Ok(Delta::from_relation(
        Relation::new(names.new_records(), schema),
        count,
    ))
}

/// Current versions whose attributes differ from the source row with the same key.
///
/// Every source column that is neither part of the key nor a history column is compared by name
/// with [`Value::differs_from`]. Source rows in `exclude` (keys inserted earlier in this run) are
/// skipped. Writes `chg_<dataset>(id, src_id)`: the historical `row_id` to expire and the source
/// `dup_row_id` carrying its replacement, ordered by `id`.
pub fn find_changed_records(
    tx: &mut Transaction<'_>,
    names: &RelationNames,
    history: &HistoricalSchema,
    src: &Relation,
    key: &[String],
    exclude: &HashSet<i64>,
) -> MergeResult<Delta> {
    let db = tx.database();
    let source = db.require(&src.name)?;
    let current = filter_eq(
        tx.read(names.historical())?,
        CURRENT_FLAG,
        &Value::Bool(true),
    )?;

    let src_schema = &source.data().schema;
    let compared: Vec<(usize, usize)> = history
        .source_schema()
        .fields
        .iter()
        .filter(|f| !key.contains(&f.name))
        .filter_map(|f| Some((src_schema.index_of(&f.name)?, current.schema.index_of(&f.name)?)))
        .collect();

    let by_key = index_by_key(&current, key)?;
    let src_key = KeyColumns::resolve(src_schema, key)?;
    let src_id_idx = src_schema.index_of(DUP_ROW_ID).ok_or_else(|| {
        MergeError::schema_mismatch(format!("'{}' lacks '{DUP_ROW_ID}'", src.name))
    })?;
    let row_id_idx = current.schema.index_of(ROW_ID).ok_or_else(|| {
        MergeError::schema_mismatch(format!("'{}' lacks '{ROW_ID}'", names.historical()))
    })?;

    let mut changed: Vec<(i64, i64)> = source
        .data()
        .rows
        .par_iter()
        .filter_map(|row| {
            let src_id = row[src_id_idx].as_i64()?;
            if exclude.contains(&src_id) {
                return None;
            }
            let cur = &current.rows[*by_key.get(&src_key.key_of(row))?];
            if !compared.iter().any(|&(s, c)| row[s].differs_from(&cur[c])) {
                return None;
            }
            Some((cur[row_id_idx].as_i64()?, src_id))
        })
        .collect();
    changed.sort_unstable();

    let count = changed.len();
    let schema = Schema::new(vec![
        Field::required(ID, DataType::Int64),
        Field::required(SRC_ID, DataType::Int64),
    ]);
    let rows = changed
        .into_iter()
        .map(|(id, src_id)| vec![Value::Int64(id), Value::Int64(src_id)])
        .collect();
    db.put_table(names.changed_records(), DataSet::new(schema.clone(), rows));
    debug!(relation = names.changed_records(), count, "detected changed records");

    Ok(Delta::from_relation(
        Relation::new(names.changed_records(), schema),
        count,
    ))
}
