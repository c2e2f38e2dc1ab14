//! CSV reading and typed value parsing.

use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{MergeError, MergeResult};
use crate::types::{DataType, Schema, Value};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// Build a CSV reader with the settings every extract is read with.
///
/// Records are read with flexible arity so a short/long row surfaces as a row-level error
/// instead of aborting the reader.
pub fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(input)
}

/// Map schema fields to CSV column positions by header name (order can differ).
///
/// The header must name exactly the schema's columns: a missing or an unexpected column is a
/// schema mismatch.
pub fn map_header(headers: &csv::StringRecord, schema: &Schema) -> MergeResult<Vec<usize>> {
    let header_names: Vec<&str> = headers.iter().collect();

    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match header_names.iter().position(|h| *h == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(MergeError::schema_mismatch(format!(
                    "missing required column '{field}'. headers={header_names:?}",
                    field = field.name
                )));
            }
        }
    }

    if let Some(extra) = header_names.iter().find(|h| schema.index_of(h).is_none()) {
        return Err(MergeError::schema_mismatch(format!(
            "unexpected column '{extra}' not present in the historical table. columns={:?}",
            schema.field_names().collect::<Vec<_>>()
        )));
    }

    Ok(col_idxs)
}

/// Parse one CSV record into a typed row, or fail without producing a partial row.
///
/// `row` is the 1-based line number reported in errors.
pub fn parse_record(
    row: usize,
    record: &csv::StringRecord,
    schema: &Schema,
    col_idxs: &[usize],
    expected_width: usize,
) -> MergeResult<Vec<Value>> {
    if record.len() != expected_width {
        return Err(MergeError::BadRow {
            row,
            column: String::new(),
            raw: record.iter().collect::<Vec<_>>().join(","),
            message: format!("expected {expected_width} fields, found {}", record.len()),
        });
    }

    schema
        .fields
        .iter()
        .zip(col_idxs)
        .map(|(field, &csv_idx)| {
            let raw = record.get(csv_idx).unwrap_or("");
            parse_typed_value(row, &field.name, field.data_type, raw)
        })
        .collect()
}

/// Parse a raw CSV cell under `data_type`. Empty cells are [`Value::Null`].
pub fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: DataType,
    raw: &str,
) -> MergeResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let bad = |message: String| MergeError::BadRow {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| bad(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| bad(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(bad),
        DataType::Timestamp => parse_timestamp(trimmed)
            .map(Value::Timestamp)
            .ok_or_else(|| bad("expected a timestamp".to_string())),
        DataType::Date => parse_date(trimmed)
            .map(Value::Date)
            .ok_or_else(|| bad("expected a date".to_string())),
        DataType::Time => parse_time(trimmed)
            .map(Value::Time)
            .ok_or_else(|| bad("expected a time of day".to_string())),
        DataType::Geometry => trimmed
            .parse()
            .map(Value::Geometry)
            .map_err(|e: crate::geometry::ParsePointError| bad(e.to_string())),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

/// Boolean spelling accepted during type inference.
///
/// Narrower than staging: `0`/`1` columns infer as integers.
pub(crate) fn looks_like_bool(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "true" | "false" | "t" | "f" | "yes" | "no"
    )
}

/// Parse a timestamp; a bare date is promoted to midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::MIN)))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{parse_date, parse_time, parse_timestamp, parse_typed_value};
    use crate::error::MergeError;
    use crate::types::{DataType, Value};

    #[test]
    fn portal_timestamps_parse() {
        let ts = parse_timestamp("01/15/2014 01:30:00 PM").unwrap();
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2014, 1, 15)
                .unwrap()
                .and_hms_opt(13, 30, 0)
                .unwrap()
        );
        assert!(parse_timestamp("2014-01-15T13:30:00.250").is_some());
        assert_eq!(
            parse_timestamp("2014-01-15"),
            NaiveDate::from_ymd_opt(2014, 1, 15).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn dates_and_times_parse() {
        assert_eq!(parse_date("2014-01-15"), NaiveDate::from_ymd_opt(2014, 1, 15));
        assert_eq!(parse_date("01/15/2014"), NaiveDate::from_ymd_opt(2014, 1, 15));
        assert_eq!(parse_time("07:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert_eq!(parse_time("7:05:09 PM"), NaiveTime::from_hms_opt(19, 5, 9));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn empty_cells_are_null_for_every_type() {
        for dt in [DataType::Int64, DataType::Bool, DataType::Timestamp, DataType::Utf8] {
            assert_eq!(parse_typed_value(2, "c", dt, "  ").unwrap(), Value::Null);
        }
    }

    #[test]
    fn unparseable_values_are_bad_rows() {
        let err = parse_typed_value(4, "ward", DataType::Int64, "twelve").unwrap_err();
        match err {
            MergeError::BadRow { row, column, raw, .. } => {
                assert_eq!(row, 4);
                assert_eq!(column, "ward");
                assert_eq!(raw, "twelve");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
