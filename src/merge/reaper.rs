//! Drops a run's ephemeral relations.

use tracing::debug;

use crate::store::Database;

use super::names::RelationNames;

/// Drop every ephemeral relation of the dataset. Missing relations are skipped.
///
/// Returns how many relations were dropped.
pub fn reap(db: &Database, names: &RelationNames) -> usize {
    let dropped = names
        .ephemeral()
        .into_iter()
        .filter(|name| db.drop_table_if_exists(name))
        .count();
    debug!(relation = names.historical(), dropped, "reaped ephemeral relations");
    dropped
}
