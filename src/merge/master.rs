//! Master projector: mirror historical versions into the shared master relation.
//!
//! Every dataset appends to the same relation. Rows are tagged with `dataset_name` and point back
//! at their historical version through `dataset_row_id`.

use std::collections::HashSet;

use chrono::{NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::descriptor::DatasetDescriptor;
use crate::error::{MergeError, MergeResult};
use crate::geometry::GeoPoint;
use crate::ingestion::csv::parse_timestamp;
use crate::processing::rows_with_ids;
use crate::store::{Database, Predicate, Transaction};
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::history::{CURRENT_FLAG, END_DATE, ROW_ID, START_DATE};
use super::names::{RelationNames, MASTER_TABLE};

pub const LOCATION: &str = "location";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const OBSERVATION_DATE: &str = "observation_date";
pub const OBSERVATION_TIMESTAMP: &str = "observation_timestamp";
pub const GEOTAGS: [&str; 3] = ["geotag1", "geotag2", "geotag3"];
pub const DATASET_NAME: &str = "dataset_name";
pub const DATASET_ROW_ID: &str = "dataset_row_id";
pub const LOCATION_GEOM: &str = "location_geom";
pub const MASTER_ROW_ID: &str = "master_row_id";

/// Column layout of the master relation.
pub fn master_schema() -> Schema {
    let mut fields = vec![
        Field::required(START_DATE, DataType::Timestamp),
        Field::new(END_DATE, DataType::Timestamp),
        Field::required(CURRENT_FLAG, DataType::Bool),
        Field::new(LOCATION, DataType::Utf8),
        Field::new(LATITUDE, DataType::Float64),
        Field::new(LONGITUDE, DataType::Float64),
        Field::new(OBSERVATION_DATE, DataType::Timestamp),
        Field::new(OBSERVATION_TIMESTAMP, DataType::Timestamp),
    ];
    fields.extend(GEOTAGS.iter().map(|g| Field::new(*g, DataType::Utf8)));
    fields.extend([
        Field::required(DATASET_NAME, DataType::Utf8),
        Field::required(DATASET_ROW_ID, DataType::Int64),
        Field::new(LOCATION_GEOM, DataType::Geometry),
        Field::required(MASTER_ROW_ID, DataType::Int64),
    ]);
    Schema::new(fields)
}

/// Create the master relation unless it exists.
pub fn ensure_master(db: &Database) {
    db.create_table_if_absent(MASTER_TABLE, master_schema());
}

/// Positions of the descriptor's columns in the historical relation.
struct Projection {
    start: usize,
    end: usize,
    current: usize,
    row_id: usize,
    location: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
    observed: Option<usize>,
}

impl Projection {
    fn resolve(schema: &Schema, descriptor: &DatasetDescriptor) -> MergeResult<Self> {
        let required = |name: &str| {
            schema.index_of(name).ok_or_else(|| {
                MergeError::schema_mismatch(format!("historical relation lacks '{name}'"))
            })
        };
        let optional = |column: &Option<String>| -> MergeResult<Option<usize>> {
            column.as_deref().map(required).transpose()
        };
        Ok(Self {
            start: required(START_DATE)?,
            end: required(END_DATE)?,
            current: required(CURRENT_FLAG)?,
            row_id: required(ROW_ID)?,
            location: optional(&descriptor.location)?,
            latitude: optional(&descriptor.latitude)?,
            longitude: optional(&descriptor.longitude)?,
            observed: optional(&descriptor.observed_date)?,
        })
    }

    fn master_row(&self, dataset: &str, row: &[Value], master_row_id: i64) -> Vec<Value> {
        let pick = |idx: Option<usize>| idx.map_or(&Value::Null, |i| &row[i]);
        let lat = pick(self.latitude).as_f64();
        let lon = pick(self.longitude).as_f64();

        let mut out = vec![
            row[self.start].clone(),
            row[self.end].clone(),
            row[self.current].clone(),
            as_text(pick(self.location)),
            lat.map_or(Value::Null, Value::Float64),
            lon.map_or(Value::Null, Value::Float64),
            as_timestamp(pick(self.observed)),
            Value::Null,
        ];
        out.extend(GEOTAGS.iter().map(|_| Value::Null));
        out.extend([
            Value::Utf8(dataset.to_string()),
            row[self.row_id].clone(),
            GeoPoint::from_lat_lon(lat, lon).map_or(Value::Null, Value::Geometry),
            Value::Int64(master_row_id),
        ]);
        out
    }
}

fn as_text(v: &Value) -> Value {
    match v {
        Value::Null => Value::Null,
        Value::Utf8(s) => Value::Utf8(s.clone()),
        other => Value::Utf8(other.to_string()),
    }
}

fn as_timestamp(v: &Value) -> Value {
    match v {
        Value::Timestamp(t) => Value::Timestamp(*t),
        Value::Date(d) => Value::Timestamp(d.and_time(NaiveTime::MIN)),
        Value::Utf8(s) => parse_timestamp(s).map_or(Value::Null, Value::Timestamp),
        _ => Value::Null,
    }
}

/// Append one master row for each historical version in `row_ids`.
///
/// Latitude and longitude are copied when numeric. `location_geom` is a WGS84 point only when
/// both are present and finite, and null otherwise. Returns the number of master rows appended.
pub fn project_versions(
    tx: &mut Transaction<'_>,
    names: &RelationNames,
    descriptor: &DatasetDescriptor,
    row_ids: &[i64],
) -> MergeResult<usize> {
    if row_ids.is_empty() {
        return Ok(0);
    }
    let wanted: HashSet<i64> = row_ids.iter().copied().collect();
    let versions: DataSet = rows_with_ids(tx.read(names.historical())?, ROW_ID, &wanted)?;
    let projection = Projection::resolve(&versions.schema, descriptor)?;

    let db = tx.database();
    let master_ids = db.allocate_ids(MASTER_TABLE, versions.row_count());
    let rows: Vec<Vec<Value>> = versions
        .rows
        .iter()
        .zip(master_ids)
        .map(|(row, id)| projection.master_row(&descriptor.dataset_name, row, id))
        .collect();

    let appended = tx.append(MASTER_TABLE, rows)?;
    debug!(dataset = %descriptor.dataset_name, appended, "projected versions to master");
    Ok(appended)
}

/// Expire the current master rows of `dataset` that mirror the historical versions in `expired`.
pub fn propagate_expiration(
    tx: &mut Transaction<'_>,
    dataset: &str,
    expired: &HashSet<i64>,
    boundary: NaiveDateTime,
) -> MergeResult<usize> {
    if expired.is_empty() {
        return Ok(0);
    }
    let touched = tx.update(
        MASTER_TABLE,
        Predicate::And(vec![
            Predicate::Eq(DATASET_NAME.to_string(), Value::Utf8(dataset.to_string())),
            Predicate::InIds(DATASET_ROW_ID.to_string(), expired.clone()),
            Predicate::Eq(CURRENT_FLAG.to_string(), Value::Bool(true)),
        ]),
        vec![
            (CURRENT_FLAG.to_string(), Value::Bool(false)),
            (END_DATE.to_string(), Value::Timestamp(boundary)),
        ],
    )?;
    debug!(dataset, expired = touched, "propagated expiration to master");
    Ok(touched)
}
