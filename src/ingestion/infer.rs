//! Column type inference for first-time table creation.
//!
//! Given a header and sampled rows, pick one [`DataType`] per column: the first of boolean,
//! integer, float, date, timestamp, time-of-day that accepts every non-empty sample, falling back
//! to text. A column is nullable if any sampled cell was empty.

use std::io::Read;

use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::types::{DataType, Field, Schema};

use super::csv::{looks_like_bool, parse_date, parse_time, parse_timestamp, reader};

const CANDIDATES: &[DataType] = &[
    DataType::Bool,
    DataType::Int64,
    DataType::Float64,
    DataType::Date,
    DataType::Timestamp,
    DataType::Time,
];

/// Inference state for one column.
#[derive(Debug, Clone)]
struct ColumnGuess {
    viable: Vec<DataType>,
    saw_null: bool,
    saw_value: bool,
}

impl ColumnGuess {
    fn new() -> Self {
        Self {
            viable: CANDIDATES.to_vec(),
            saw_null: false,
            saw_value: false,
        }
    }

    fn observe(&mut self, raw: &str) {
        let v = raw.trim();
        if v.is_empty() {
            self.saw_null = true;
            return;
        }
        self.saw_value = true;
        self.viable.retain(|dt| accepts(*dt, v));
    }

    fn resolve(&self) -> (DataType, bool) {
        let data_type = if self.saw_value {
            self.viable.first().copied().unwrap_or(DataType::Utf8)
        } else {
            DataType::Utf8
        };
        (data_type, self.saw_null)
    }
}

fn accepts(data_type: DataType, v: &str) -> bool {
    match data_type {
        DataType::Bool => looks_like_bool(v),
        DataType::Int64 => v.parse::<i64>().is_ok(),
        DataType::Float64 => v.parse::<f64>().is_ok_and(f64::is_finite),
        DataType::Date => parse_date(v).is_some(),
        DataType::Timestamp => parse_timestamp(v).is_some(),
        DataType::Time => parse_time(v).is_some(),
        DataType::Utf8 | DataType::Geometry => false,
    }
}

/// Infer a schema from a header and an iterator of rows.
///
/// Rows shorter than the header count their missing cells as empty.
pub fn infer_schema<I, R, S>(header: &[String], rows: I) -> Schema
where
    I: IntoIterator<Item = R>,
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let mut guesses = vec![ColumnGuess::new(); header.len()];
    for row in rows {
        let row = row.as_ref();
        for (idx, guess) in guesses.iter_mut().enumerate() {
            guess.observe(row.get(idx).map_or("", |s| s.as_ref()));
        }
    }

    let fields = header
        .iter()
        .zip(&guesses)
        .map(|(name, guess)| {
            let (data_type, nullable) = guess.resolve();
            Field {
                name: name.clone(),
                data_type,
                nullable,
            }
        })
        .collect();
    Schema::new(fields)
}

/// Infer a schema by reading a CSV extract.
///
/// `sample_rows` bounds how many data rows are examined; `None` reads the whole extract.
pub fn infer_schema_from_csv<R: Read>(input: R, sample_rows: Option<usize>) -> MergeResult<Schema> {
    let mut rdr = reader(input);
    let header: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
    if header.is_empty() {
        return Err(MergeError::schema_mismatch("extract has no header row"));
    }
    if let Some(dup) = header
        .iter()
        .enumerate()
        .find(|(i, h)| header[..*i].contains(h))
        .map(|(_, h)| h)
    {
        return Err(MergeError::schema_mismatch(format!(
            "duplicate column '{dup}' in extract header"
        )));
    }

    let limit = sample_rows.unwrap_or(usize::MAX);
    let mut sampled = Vec::new();
    for record in rdr.records().take(limit) {
        let record = record?;
        sampled.push(record.iter().map(str::to_owned).collect::<Vec<_>>());
    }

    let schema = infer_schema(&header, &sampled);
    debug!(columns = schema.len(), sampled = sampled.len(), "inferred extract schema");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::{infer_schema, infer_schema_from_csv};
    use crate::types::DataType;

    fn types_of(csv: &str) -> Vec<(String, DataType, bool)> {
        infer_schema_from_csv(csv.as_bytes(), None)
            .unwrap()
            .fields
            .into_iter()
            .map(|f| (f.name, f.data_type, f.nullable))
            .collect()
    }

    #[test]
    fn picks_the_narrowest_kind_that_fits_every_sample() {
        let csv = "flag,count,ratio,day,at,clock,label\n\
                   true,1,1.5,2014-01-01,2014-01-01 10:00:00,10:00,x\n\
                   no,2,2,2014-01-02,2014-01-02,11:30:15,7\n";
        let got = types_of(csv);
        let kinds: Vec<DataType> = got.iter().map(|(_, t, _)| *t).collect();
        assert_eq!(
            kinds,
            vec![
                DataType::Bool,
                DataType::Int64,
                DataType::Float64,
                DataType::Date,
                DataType::Timestamp,
                DataType::Time,
                DataType::Utf8,
            ]
        );
    }

    #[test]
    fn zero_one_columns_are_integers_not_booleans() {
        let got = types_of("bit\n0\n1\n");
        assert_eq!(got[0].1, DataType::Int64);
    }

    #[test]
    fn empty_cells_make_a_column_nullable() {
        let got = types_of("a,b\n1,\n2,x\n");
        assert_eq!(got[0], ("a".to_string(), DataType::Int64, false));
        assert_eq!(got[1], ("b".to_string(), DataType::Utf8, true));
    }

    #[test]
    fn all_empty_column_is_nullable_text() {
        let header = vec!["only".to_string()];
        let rows: Vec<Vec<&str>> = vec![vec![""], vec![""]];
        let schema = infer_schema(&header, &rows);
        assert_eq!(schema.fields[0].data_type, DataType::Utf8);
        assert!(schema.fields[0].nullable);
    }

    #[test]
    fn sample_limit_bounds_inference() {
        let csv = "n\n1\n2\nthree\n";
        let full = infer_schema_from_csv(csv.as_bytes(), None).unwrap();
        let sampled = infer_schema_from_csv(csv.as_bytes(), Some(2)).unwrap();
        assert_eq!(full.fields[0].data_type, DataType::Utf8);
        assert_eq!(sampled.fields[0].data_type, DataType::Int64);
    }

    #[test]
    fn duplicate_header_is_rejected() {
        assert!(infer_schema_from_csv("a,a\n1,2\n".as_bytes(), None).is_err());
    }
}
