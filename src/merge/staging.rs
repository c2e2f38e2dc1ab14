//! Staging loader: extract → `raw_<dataset>`.

use std::io::Read;

use tracing::{debug, warn};

use crate::config::BadRowPolicy;
use crate::error::{MergeError, MergeResult};
use crate::ingestion::csv::{map_header, parse_record, reader};
use crate::store::Database;
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::history::{HistoricalSchema, DUP_ROW_ID};
use super::names::RelationNames;
use super::Relation;

/// Result of loading one extract into staging.
#[derive(Debug, Clone)]
pub struct StagingOutcome {
    pub relation: Relation,
    pub loaded: usize,
    pub skipped: usize,
}

/// Schema of the staging relation: the historical source columns plus `dup_row_id`.
pub fn staging_schema(history: &HistoricalSchema) -> Schema {
    let mut schema = history.source_schema();
    schema
        .fields
        .push(Field::required(DUP_ROW_ID, DataType::Int64));
    schema
}

/// Stream `input` into a freshly recreated staging relation.
///
/// The header may list the columns in any order but must name exactly the historical table's
/// source columns. Each row is parsed completely before it is added, so a bad row is either
/// skipped whole or aborts the load, depending on `policy`. Staged rows are numbered from 1 in
/// extract order.
pub fn stage_extract<R: Read>(
    db: &Database,
    names: &RelationNames,
    history: &HistoricalSchema,
    input: R,
    policy: BadRowPolicy,
) -> MergeResult<StagingOutcome> {
    db.drop_table_if_exists(names.raw());

    let source = history.source_schema();
    let schema = staging_schema(history);

    let mut rdr = reader(input);
    let headers = rdr.headers()?.clone();
    let col_idxs = map_header(&headers, &source)?;

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut skipped = 0usize;
    for (row_idx0, result) in rdr.records().enumerate() {
        // Report 1-based row number for users; +1 again because header is row 1.
        let user_row = row_idx0 + 2;
        let parsed = result
            .map_err(MergeError::from)
            .and_then(|record| parse_record(user_row, &record, &source, &col_idxs, headers.len()));

        match parsed {
            Ok(mut row) => {
                row.push(Value::Int64(rows.len() as i64 + 1));
                rows.push(row);
            }
            Err(err) if policy == BadRowPolicy::Skip && is_row_local(&err) => {
                warn!(relation = names.raw(), row = user_row, error = %err, "skipping bad row");
                skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    let loaded = rows.len();
    db.put_table(names.raw(), DataSet::new(schema.clone(), rows));
    debug!(relation = names.raw(), loaded, skipped, "staged extract");

    Ok(StagingOutcome {
        relation: Relation::new(names.raw(), schema),
        loaded,
        skipped,
    })
}

/// Failures confined to one row; anything else (I/O) ends the load regardless of policy.
fn is_row_local(err: &MergeError) -> bool {
    match err {
        MergeError::BadRow { .. } => true,
        MergeError::Csv(e) => !matches!(e.kind(), ::csv::ErrorKind::Io(_)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::stage_extract;
    use crate::config::BadRowPolicy;
    use crate::error::MergeError;
    use crate::merge::history::HistoricalSchema;
    use crate::merge::names::RelationNames;
    use crate::store::Database;
    use crate::types::{DataType, Field, Schema, Value};

    fn history() -> HistoricalSchema {
        HistoricalSchema::from_source(&Schema::new(vec![
            Field::new("request_id", DataType::Utf8),
            Field::new("ward", DataType::Int64),
        ]))
        .unwrap()
    }

    fn names() -> RelationNames {
        RelationNames::for_dataset("potholes311")
    }

    #[test]
    fn reordered_header_is_mapped_by_name() {
        let db = Database::new();
        let out = stage_extract(
            &db,
            &names(),
            &history(),
            "ward,request_id\n12,A\n,B\n".as_bytes(),
            BadRowPolicy::Abort,
        )
        .unwrap();

        assert_eq!(out.loaded, 2);
        let raw = db.require("raw_potholes311").unwrap();
        assert_eq!(
            raw.data().rows,
            vec![
                vec![Value::Utf8("A".into()), Value::Int64(12), Value::Int64(1)],
                vec![Value::Utf8("B".into()), Value::Null, Value::Int64(2)],
            ]
        );
    }

    #[test]
    fn bad_row_aborts_by_default() {
        let db = Database::new();
        let err = stage_extract(
            &db,
            &names(),
            &history(),
            "request_id,ward\nA,1\nB,two\n".as_bytes(),
            BadRowPolicy::Abort,
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::BadRow { row: 3, .. }));
        assert!(!db.has_table("raw_potholes311"));
    }

    #[test]
    fn skip_policy_drops_whole_rows_only() {
        let db = Database::new();
        let out = stage_extract(
            &db,
            &names(),
            &history(),
            "request_id,ward\nA,1\nB,two\nC\nD,4,extra\nE,5\n".as_bytes(),
            BadRowPolicy::Skip,
        )
        .unwrap();
        assert_eq!((out.loaded, out.skipped), (2, 3));

        let raw = db.require("raw_potholes311").unwrap();
        let ids: Vec<Value> = raw.data().column("dup_row_id").unwrap().cloned().collect();
        assert_eq!(ids, vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(raw.data().value(1, "request_id"), Some(&Value::Utf8("E".into())));
    }

    #[test]
    fn header_must_match_the_table() {
        let db = Database::new();
        let err = stage_extract(
            &db,
            &names(),
            &history(),
            "request_id,ward,status\nA,1,open\n".as_bytes(),
            BadRowPolicy::Abort,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unexpected column 'status'"));
    }

    #[test]
    fn restaging_replaces_the_previous_relation() {
        let db = Database::new();
        let csv = "request_id,ward\nA,1\n";
        stage_extract(&db, &names(), &history(), csv.as_bytes(), BadRowPolicy::Abort).unwrap();
        stage_extract(&db, &names(), &history(), csv.as_bytes(), BadRowPolicy::Abort).unwrap();
        assert_eq!(db.require("raw_potholes311").unwrap().row_count(), 1);
    }
}
