//! Shape of the historical (`dat_<dataset>`) relation.

use chrono::NaiveDateTime;
use tracing::info;

use crate::descriptor::DatasetDescriptor;
use crate::error::{MergeError, MergeResult};
use crate::ingestion::{infer::infer_schema_from_csv, ExtractSource};
use crate::store::Database;
use crate::types::{DataType, Field, Schema, Value};

use super::names::RelationNames;

pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";
pub const CURRENT_FLAG: &str = "current_flag";
pub const ROW_ID: &str = "row_id";
/// Synthetic identifier assigned to every staged row.
pub const DUP_ROW_ID: &str = "dup_row_id";

/// Column names the engine adds and an extract may not use.
pub const RESERVED_COLUMNS: &[&str] = &[START_DATE, END_DATE, CURRENT_FLAG, ROW_ID, DUP_ROW_ID];

/// Schema of a historical relation: four history columns followed by the source columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalSchema {
    schema: Schema,
}

impl HistoricalSchema {
    /// Build the historical schema for an inferred source schema.
    pub fn from_source(source: &Schema) -> MergeResult<Self> {
        if let Some(f) = source
            .fields
            .iter()
            .find(|f| RESERVED_COLUMNS.contains(&f.name.as_str()))
        {
            return Err(MergeError::schema_mismatch(format!(
                "extract column '{}' collides with a reserved history column",
                f.name
            )));
        }

        let mut fields = vec![
            Field::required(START_DATE, DataType::Timestamp),
            Field::new(END_DATE, DataType::Timestamp),
            Field::required(CURRENT_FLAG, DataType::Bool),
            Field::required(ROW_ID, DataType::Int64),
        ];
        fields.extend(source.fields.iter().cloned());
        Ok(Self {
            schema: Schema::new(fields),
        })
    }

    /// Wrap the schema of an existing historical relation.
    pub fn from_table(schema: Schema) -> MergeResult<Self> {
        for col in [START_DATE, END_DATE, CURRENT_FLAG, ROW_ID] {
            if schema.index_of(col).is_none() {
                return Err(MergeError::schema_mismatch(format!(
                    "existing historical relation lacks the '{col}' column"
                )));
            }
        }
        Ok(Self { schema })
    }

    /// Full schema, history columns included.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Source columns in physical order.
    pub fn source_schema(&self) -> Schema {
        Schema::new(
            self.schema
                .fields
                .iter()
                .filter(|f| !is_history_column(&f.name))
                .cloned()
                .collect(),
        )
    }

    /// Build one current version row from a source row.
    ///
    /// `source` must have the [`Self::source_schema`] columns, looked up by name.
    pub fn version_row(
        &self,
        source_schema: &Schema,
        source: &[Value],
        row_id: i64,
        start_date: NaiveDateTime,
    ) -> MergeResult<Vec<Value>> {
        self.schema
            .fields
            .iter()
            .map(|field| -> MergeResult<Value> {
                Ok(match field.name.as_str() {
                    START_DATE => Value::Timestamp(start_date),
                    END_DATE => Value::Null,
                    CURRENT_FLAG => Value::Bool(true),
                    ROW_ID => Value::Int64(row_id),
                    name => {
                        let idx = source_schema.index_of(name).ok_or_else(|| {
                            MergeError::schema_mismatch(format!(
                                "source relation lacks column '{name}'"
                            ))
                        })?;
                        source[idx].clone()
                    }
                })
            })
            .collect()
    }
}

fn is_history_column(name: &str) -> bool {
    matches!(name, START_DATE | END_DATE | CURRENT_FLAG | ROW_ID)
}

/// Return the historical relation's schema, creating the relation on first use.
///
/// A relation that already exists is reused as-is; its shape is never altered. Otherwise the
/// schema is inferred from `extract`.
pub fn get_or_create(
    db: &Database,
    names: &RelationNames,
    descriptor: &DatasetDescriptor,
    extract: &dyn ExtractSource,
    sample_rows: Option<usize>,
) -> MergeResult<HistoricalSchema> {
    if let Some(existing) = db.table(names.historical()) {
        return HistoricalSchema::from_table(existing.schema().clone());
    }

    let source = infer_schema_from_csv(extract.open()?, sample_rows)?;
    let history = HistoricalSchema::from_source(&source)?;
    descriptor.check_columns(history.schema())?;

    if db.create_table_if_absent(names.historical(), history.schema().clone()) {
        info!(
            dataset = %descriptor.dataset_name,
            relation = names.historical(),
            columns = source.len(),
            "created historical relation"
        );
        Ok(history)
    } else {
        // Lost a creation race; the winner's shape is authoritative.
        let existing = db.require(names.historical())?;
        HistoricalSchema::from_table(existing.schema().clone())
    }
}
