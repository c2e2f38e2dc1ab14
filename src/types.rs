//! Core data model types.
//!
//! Every relation the merge engine touches (staging, unique-source, historical, master) is a
//! [`DataSet`]: a [`Schema`] of typed [`Field`]s plus row-major [`Value`] storage.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::geometry::GeoPoint;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Date and time without time zone.
    Timestamp,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// UTF-8 string.
    Utf8,
    /// Point geometry in geographic coordinates.
    Geometry,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "boolean",
            Self::Int64 => "integer",
            Self::Float64 => "float",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Time => "time",
            Self::Utf8 => "text",
            Self::Geometry => "geometry",
        };
        f.write_str(name)
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
    /// Whether the column may hold [`Value::Null`].
    pub nullable: bool,
}

impl Field {
    /// Create a new nullable field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Create a field that is declared to never hold nulls.
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            nullable: false,
            ..Self::new(name, data_type)
        }
    }
}

/// A list of fields describing the shape of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Date and time without time zone.
    Timestamp(NaiveDateTime),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// UTF-8 string.
    Utf8(String),
    /// Point geometry.
    Geometry(GeoPoint),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null-safe equality: null equals null, floats compare by bit pattern.
    ///
    /// This is the equality used for grouping and key joins.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => float_bits(*a) == float_bits(*b),
            (Self::Geometry(a), Self::Geometry(b)) => {
                a.srid == b.srid
                    && float_bits(a.x) == float_bits(b.x)
                    && float_bits(a.y) == float_bits(b.y)
            }
            _ => self == other,
        }
    }

    /// Attribute difference as seen by change detection.
    ///
    /// Absent on both sides is not a difference; absent on one side is.
    pub fn differs_from(&self, other: &Value) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => !self.same_as(other),
        }
    }

    /// Numeric view of the value, if it has one.
    ///
    /// Text is parsed so that coordinates typed as text still geocode.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Utf8(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

/// Collapse `-0.0` onto `0.0` and every NaN onto one pattern.
pub(crate) fn float_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Self::Utf8(v) => f.write_str(v),
            Self::Geometry(p) => write!(f, "{p}"),
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Create a dataset with no rows.
    pub fn empty(schema: Schema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Values of a named column, in row order.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Value of a named column in the given row.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn null_only_differs_from_concrete_values() {
        assert!(!Value::Null.differs_from(&Value::Null));
        assert!(Value::Null.differs_from(&Value::Int64(1)));
        assert!(Value::Utf8("open".into()).differs_from(&Value::Null));
        assert!(!Value::Float64(f64::NAN).differs_from(&Value::Float64(f64::NAN)));
        assert!(!Value::Float64(0.0).differs_from(&Value::Float64(-0.0)));
    }

    #[test]
    fn text_coordinates_have_a_numeric_view() {
        assert_eq!(Value::Utf8(" 41.5 ".into()).as_f64(), Some(41.5));
        assert_eq!(Value::Utf8("n/a".into()).as_f64(), None);
        assert_eq!(Value::Bool(true).as_f64(), None);
    }
}
