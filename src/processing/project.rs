//! Column projection for [`crate::types::DataSet`].

use crate::error::{MergeError, MergeResult};
use crate::types::{DataSet, Schema};

/// Returns a new [`DataSet`] with only `columns`, in the given order.
pub fn project(dataset: &DataSet, columns: &[&str]) -> MergeResult<DataSet> {
    let mut idxs = Vec::with_capacity(columns.len());
    let mut fields = Vec::with_capacity(columns.len());
    for &name in columns {
        let idx = dataset.schema.index_of(name).ok_or_else(|| {
            MergeError::schema_mismatch(format!(
                "cannot project missing column '{name}'. columns={:?}",
                dataset.schema.field_names().collect::<Vec<_>>()
            ))
        })?;
        idxs.push(idx);
        fields.push(dataset.schema.fields[idx].clone());
    }

    let rows = dataset
        .rows
        .iter()
        .map(|row| idxs.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(DataSet::new(Schema::new(fields), rows))
}
