//! Deduplication: one staged row per business key.
//!
//! When an extract carries the same key more than once, the occurrence with the greatest
//! `dup_row_id` (the last one in the file) is kept. The winners' ids go to `dedupe_<dataset>`,
//! and `src_<dataset>` holds the full winning rows in extract order.

use tracing::debug;

use crate::error::MergeResult;
use crate::processing::{group_max, id_set, project, rows_with_ids};
use crate::store::Database;

use super::history::DUP_ROW_ID;
use super::names::RelationNames;
use super::Relation;

/// Build `dedupe_<dataset>`: the `dup_row_id` of the winning row for each key.
pub fn dedupe(
    db: &Database,
    names: &RelationNames,
    raw: &Relation,
    key: &[String],
) -> MergeResult<Relation> {
    let staged = db.require(&raw.name)?;
    let winners = group_max(staged.data(), key, DUP_ROW_ID)?;
    let ids = project(&winners, &[DUP_ROW_ID])?;

    let relation = Relation::new(names.dedupe(), ids.schema.clone());
    debug!(
        relation = names.dedupe(),
        staged = staged.row_count(),
        unique = ids.row_count(),
        "deduplicated staging"
    );
    db.put_table(names.dedupe(), ids);
    Ok(relation)
}

/// Build `src_<dataset>`: the staged rows whose `dup_row_id` survived deduplication.
pub fn make_source(
    db: &Database,
    names: &RelationNames,
    raw: &Relation,
    dedupe: &Relation,
) -> MergeResult<Relation> {
    let staged = db.require(&raw.name)?;
    let keep = id_set(db.require(&dedupe.name)?.data(), DUP_ROW_ID)?;
    let src = rows_with_ids(staged.data(), DUP_ROW_ID, &keep)?;

    let relation = Relation::new(names.src(), src.schema.clone());
    db.put_table(names.src(), src);
    Ok(relation)
}
