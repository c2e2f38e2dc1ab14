//! Row filtering for [`crate::types::DataSet`].

use crate::error::{MergeError, MergeResult};
use crate::types::{DataSet, Value};

/// Returns a new [`DataSet`] containing only rows for which `predicate` returns `true`.
///
/// The returned dataset preserves the original schema.
pub fn filter<F>(dataset: &DataSet, mut predicate: F) -> DataSet
where
    F: FnMut(&[Value]) -> bool,
{
    let rows = dataset
        .rows
        .iter()
        .filter(|row| predicate(row.as_slice()))
        .cloned()
        .collect();
    DataSet::new(dataset.schema.clone(), rows)
}

/// Rows whose `column` is null-safe equal to `value`.
pub fn filter_eq(dataset: &DataSet, column: &str, value: &Value) -> MergeResult<DataSet> {
    let idx = dataset
        .schema
        .index_of(column)
        .ok_or_else(|| MergeError::schema_mismatch(format!("column '{column}' not found")))?;
    Ok(filter(dataset, |row| row[idx].same_as(value)))
}
