//! Versioner: insert and expire rows of the historical relation.
//!
//! Both operations only log writes on the run's [`Transaction`]; nothing is visible to other
//! readers until the engine commits.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::processing::rows_with_ids;
use crate::store::{Predicate, Transaction};
use crate::types::{DataSet, Value};

use super::delta::{ID, SRC_ID};
use super::history::{HistoricalSchema, CURRENT_FLAG, DUP_ROW_ID, END_DATE, ROW_ID, START_DATE};
use super::names::RelationNames;
use super::Relation;

/// Result of superseding changed versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Supersession {
    /// `row_id`s of the versions that were expired, grouped by the `end_date` they received.
    pub expired: BTreeMap<NaiveDateTime, HashSet<i64>>,
    /// `row_id`s of the current versions inserted in their place.
    pub replacements: Vec<i64>,
}

impl Supersession {
    /// Number of versions expired.
    pub fn expired_count(&self) -> usize {
        self.expired.values().map(HashSet::len).sum()
    }
}

/// Insert the source rows whose `dup_row_id` is in `src_ids` as current versions starting at
/// `start`.
///
/// Returns the freshly assigned `row_id`s in source order.
pub fn insert_versions(
    tx: &mut Transaction<'_>,
    names: &RelationNames,
    history: &HistoricalSchema,
    src: &Relation,
    src_ids: &HashSet<i64>,
    start: NaiveDateTime,
) -> MergeResult<Vec<i64>> {
    if src_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = tx.database();
    let source = db.require(&src.name)?;
    let selected = rows_with_ids(source.data(), DUP_ROW_ID, src_ids)?;

    let ids = db.allocate_ids(names.historical(), selected.row_count());
    let row_ids: Vec<i64> = ids.clone().collect();
    let rows = selected
        .rows
        .iter()
        .zip(ids)
        .map(|(row, row_id)| history.version_row(&selected.schema, row, row_id, start))
        .collect::<MergeResult<Vec<_>>>()?;

    let inserted = tx.append(names.historical(), rows)?;
    debug!(relation = names.historical(), inserted, "inserted versions");
    Ok(row_ids)
}

/// Expire the versions listed in `chg_<dataset>` and insert their replacements.
///
/// Each listed version gets `current_flag = false` and an `end_date`, and a new current version
/// carrying the source row's values starts at that same instant, so no key is ever left without
/// a current version. The instant is `boundary`, raised to the expiring version's own
/// `start_date` when that is later (a day-truncated boundary can fall before a version inserted
/// earlier the same day).
///
/// Only versions still current are expired; a count that disagrees with the changed set means
/// another writer interfered, and the run fails with a conflict.
pub fn supersede_versions(
    tx: &mut Transaction<'_>,
    names: &RelationNames,
    history: &HistoricalSchema,
    src: &Relation,
    changed: &Relation,
    boundary: NaiveDateTime,
) -> MergeResult<Supersession> {
    let chg = tx.database().require(&changed.name)?;
    let pairs = changed_pairs(chg.data())?;
    if pairs.is_empty() {
        return Ok(Supersession::default());
    }

    let starts = start_dates(tx.read(names.historical())?, &pairs)?;
    let mut groups: BTreeMap<NaiveDateTime, (HashSet<i64>, HashSet<i64>)> = BTreeMap::new();
    for (row_id, src_id) in &pairs {
        let end = starts
            .get(row_id)
            .map_or(boundary, |start| boundary.max(*start));
        let (expired, src_ids) = groups.entry(end).or_default();
        expired.insert(*row_id);
        src_ids.insert(*src_id);
    }

    let mut out = Supersession::default();
    for (end, (expired, src_ids)) in groups {
        let touched = tx.update(
            names.historical(),
            Predicate::And(vec![
                Predicate::InIds(ROW_ID.to_string(), expired.clone()),
                Predicate::Eq(CURRENT_FLAG.to_string(), Value::Bool(true)),
            ]),
            vec![
                (CURRENT_FLAG.to_string(), Value::Bool(false)),
                (END_DATE.to_string(), Value::Timestamp(end)),
            ],
        )?;
        if touched != expired.len() {
            return Err(MergeError::Conflict {
                dataset: tx.owner().to_string(),
                message: format!(
                    "expected to expire {} current versions, found {touched}",
                    expired.len()
                ),
            });
        }
        debug!(relation = names.historical(), expired = touched, %end, "expired versions");

        let replacements = insert_versions(tx, names, history, src, &src_ids, end)?;
        out.replacements.extend(replacements);
        out.expired.insert(end, expired);
    }
    Ok(out)
}

/// `(row_id, src_id)` pairs of a `chg_<dataset>` relation.
fn changed_pairs(chg: &DataSet) -> MergeResult<Vec<(i64, i64)>> {
    let id = column_index(chg, ID)?;
    let src_id = column_index(chg, SRC_ID)?;
    Ok(chg
        .rows
        .iter()
        .filter_map(|row| Some((row[id].as_i64()?, row[src_id].as_i64()?)))
        .collect())
}

/// `start_date` of every listed version found in the historical relation.
fn start_dates(dat: &DataSet, pairs: &[(i64, i64)]) -> MergeResult<HashMap<i64, NaiveDateTime>> {
    let wanted: HashSet<i64> = pairs.iter().map(|(row_id, _)| *row_id).collect();
    let row_id = column_index(dat, ROW_ID)?;
    let start = column_index(dat, START_DATE)?;
    Ok(dat
        .rows
        .iter()
        .filter_map(|row| match (&row[row_id], &row[start]) {
            (Value::Int64(id), Value::Timestamp(at)) if wanted.contains(id) => Some((*id, *at)),
            _ => None,
        })
        .collect())
}

fn column_index(dataset: &DataSet, column: &str) -> MergeResult<usize> {
    dataset
        .schema
        .index_of(column)
        .ok_or_else(|| MergeError::schema_mismatch(format!("missing column '{column}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use chrono::{NaiveDate, NaiveDateTime};

    use super::{insert_versions, supersede_versions};
    use crate::merge::history::HistoricalSchema;
    use crate::merge::names::RelationNames;
    use crate::merge::Relation;
    use crate::processing::filter_eq;
    use crate::store::Database;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn fixture() -> (Database, RelationNames, HistoricalSchema, Relation) {
        let db = Database::new();
        let names = RelationNames::for_dataset("potholes311");
        let history = HistoricalSchema::from_source(&Schema::new(vec![
            Field::new("request_id", DataType::Utf8),
            Field::new("status", DataType::Utf8),
        ]))
        .unwrap();
        db.create_table(names.historical(), history.schema().clone()).unwrap();

        let mut src_schema = history.source_schema();
        src_schema.fields.push(Field::required("dup_row_id", DataType::Int64));
        let rows = vec![
            vec![Value::Utf8("A".into()), Value::Utf8("open".into()), Value::Int64(1)],
            vec![Value::Utf8("B".into()), Value::Utf8("open".into()), Value::Int64(2)],
        ];
        db.put_table(names.src(), DataSet::new(src_schema.clone(), rows));
        let src = Relation::new(names.src(), src_schema);
        (db, names, history, src)
    }

    #[test]
    fn inserted_versions_are_current_with_fresh_ids() {
        let (db, names, history, src) = fixture();
        let mut tx = db.begin("potholes311");
        let ids =
            insert_versions(&mut tx, &names, &history, &src, &HashSet::from([1, 2]), at(1)).unwrap();
        tx.commit().unwrap();

        assert_eq!(ids, vec![1, 2]);
        let dat = db.require("dat_potholes311").unwrap();
        assert_eq!(dat.row_count(), 2);
        assert_eq!(dat.data().value(0, "start_date"), Some(&Value::Timestamp(at(1))));
        assert_eq!(dat.data().value(0, "end_date"), Some(&Value::Null));
        assert_eq!(dat.data().value(1, "current_flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn superseding_expires_and_replaces_at_the_boundary() {
        let (db, names, history, src) = fixture();
        let mut tx = db.begin("potholes311");
        insert_versions(&mut tx, &names, &history, &src, &HashSet::from([1, 2]), at(1)).unwrap();
        tx.commit().unwrap();

        let chg_schema = Schema::new(vec![
            Field::required("id", DataType::Int64),
            Field::required("src_id", DataType::Int64),
        ]);
        db.put_table(
            names.changed_records(),
            DataSet::new(chg_schema.clone(), vec![vec![Value::Int64(2), Value::Int64(2)]]),
        );
        let changed = Relation::new(names.changed_records(), chg_schema);

        let mut tx = db.begin("potholes311");
        let out = supersede_versions(&mut tx, &names, &history, &src, &changed, at(2)).unwrap();
        tx.commit().unwrap();

        assert_eq!(out.expired, BTreeMap::from([(at(2), HashSet::from([2]))]));
        assert_eq!(out.replacements, vec![3]);

        let dat = db.require("dat_potholes311").unwrap();
        assert_eq!(dat.data().value(1, "current_flag"), Some(&Value::Bool(false)));
        assert_eq!(dat.data().value(1, "end_date"), Some(&Value::Timestamp(at(2))));
        assert_eq!(dat.data().value(2, "start_date"), Some(&Value::Timestamp(at(2))));

        let current = filter_eq(dat.data(), "current_flag", &Value::Bool(true)).unwrap();
        assert_eq!(current.row_count(), 2);
    }

    #[test]
    fn boundary_before_the_version_start_is_raised_to_it() {
        let (db, names, history, src) = fixture();
        let morning = at(1) + chrono::Duration::hours(8);
        let mut tx = db.begin("potholes311");
        insert_versions(&mut tx, &names, &history, &src, &HashSet::from([1, 2]), morning).unwrap();
        tx.commit().unwrap();

        let chg_schema = Schema::new(vec![
            Field::required("id", DataType::Int64),
            Field::required("src_id", DataType::Int64),
        ]);
        db.put_table(
            names.changed_records(),
            DataSet::new(chg_schema.clone(), vec![vec![Value::Int64(1), Value::Int64(1)]]),
        );
        let changed = Relation::new(names.changed_records(), chg_schema);

        // Day-truncated boundary for a run later on the same day.
        let mut tx = db.begin("potholes311");
        let out = supersede_versions(&mut tx, &names, &history, &src, &changed, at(1)).unwrap();
        tx.commit().unwrap();

        assert_eq!(out.expired, BTreeMap::from([(morning, HashSet::from([1]))]));
        let dat = db.require("dat_potholes311").unwrap();
        assert_eq!(dat.data().value(0, "end_date"), Some(&Value::Timestamp(morning)));
        assert_eq!(dat.data().value(2, "start_date"), Some(&Value::Timestamp(morning)));
    }

    #[test]
    fn expiring_a_version_that_is_no_longer_current_conflicts() {
        let (db, names, history, src) = fixture();
        let chg_schema = Schema::new(vec![
            Field::required("id", DataType::Int64),
            Field::required("src_id", DataType::Int64),
        ]);
        db.put_table(
            names.changed_records(),
            DataSet::new(chg_schema.clone(), vec![vec![Value::Int64(9), Value::Int64(1)]]),
        );
        let changed = Relation::new(names.changed_records(), chg_schema);

        let mut tx = db.begin("potholes311");
        let err = supersede_versions(&mut tx, &names, &history, &src, &changed, at(2)).unwrap_err();
        assert!(err.is_retryable());
    }
}
