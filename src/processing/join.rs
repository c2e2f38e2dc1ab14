//! Hash joins on key columns.
//!
//! Both sides are keyed with [`Key`], so joins use the same null-safe equality as grouping.

use std::collections::{HashMap, HashSet};

use crate::error::{MergeError, MergeResult};
use crate::types::{DataSet, Value};

use super::key::{Key, KeyColumns};

/// Rows of `left` whose key does not appear in `right`.
pub fn anti_join(left: &DataSet, right: &DataSet, key: &[String]) -> MergeResult<DataSet> {
    let left_key = KeyColumns::resolve(&left.schema, key)?;
    let right_key = KeyColumns::resolve(&right.schema, key)?;

    let right_keys: HashSet<Key> = right.rows.iter().map(|r| right_key.key_of(r)).collect();
    let rows = left
        .rows
        .iter()
        .filter(|r| !right_keys.contains(&left_key.key_of(r)))
        .cloned()
        .collect();
    Ok(DataSet::new(left.schema.clone(), rows))
}

/// Map each key of `dataset` to the index of its row.
///
/// When a key repeats, the later row wins.
pub fn index_by_key(dataset: &DataSet, key: &[String]) -> MergeResult<HashMap<Key, usize>> {
    let cols = KeyColumns::resolve(&dataset.schema, key)?;
    Ok(dataset
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| (cols.key_of(r), i))
        .collect())
}

/// Collect the integer values of `column`, ignoring nulls.
pub fn id_set(dataset: &DataSet, column: &str) -> MergeResult<HashSet<i64>> {
    let values = dataset.column(column).ok_or_else(|| {
        MergeError::schema_mismatch(format!("id column '{column}' not found"))
    })?;
    Ok(values.filter_map(Value::as_i64).collect())
}

/// Rows of `dataset` whose integer `column` is in `ids`.
pub fn rows_with_ids(dataset: &DataSet, column: &str, ids: &HashSet<i64>) -> MergeResult<DataSet> {
    let idx = dataset.schema.index_of(column).ok_or_else(|| {
        MergeError::schema_mismatch(format!("id column '{column}' not found"))
    })?;
    Ok(super::filter(dataset, |row| {
        row[idx].as_i64().is_some_and(|id| ids.contains(&id))
    }))
}
