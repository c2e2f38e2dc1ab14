//! Grouping reductions for [`crate::types::DataSet`].

use std::collections::HashMap;

use crate::error::{MergeError, MergeResult};
use crate::types::DataSet;

use super::key::{Key, KeyColumns};

/// Keep one row per key: the row with the greatest integer value in `order_by`.
///
/// Rows with a null `order_by` never win over a row with a value. The output is ordered by
/// `order_by` ascending so repeated runs produce identical relations.
pub fn group_max(dataset: &DataSet, key: &[String], order_by: &str) -> MergeResult<DataSet> {
    let cols = KeyColumns::resolve(&dataset.schema, key)?;
    let order_idx = dataset.schema.index_of(order_by).ok_or_else(|| {
        MergeError::schema_mismatch(format!("ordering column '{order_by}' not found"))
    })?;

    let mut best: HashMap<Key, (Option<i64>, usize)> = HashMap::new();
    for (i, row) in dataset.rows.iter().enumerate() {
        let ord = row[order_idx].as_i64();
        best.entry(cols.key_of(row))
            .and_modify(|cur| {
                if ord > cur.0 {
                    *cur = (ord, i);
                }
            })
            .or_insert((ord, i));
    }

    let mut winners: Vec<(Option<i64>, usize)> = best.into_values().collect();
    winners.sort_unstable();
    let rows = winners
        .into_iter()
        .map(|(_, i)| dataset.rows[i].clone())
        .collect();
    Ok(DataSet::new(dataset.schema.clone(), rows))
}
