//! Composite key extraction with null-safe equality.

use std::hash::{Hash, Hasher};

use crate::error::{MergeError, MergeResult};
use crate::types::{float_bits, Schema, Value};

/// The values of one row's key columns.
///
/// Equality is [`Value::same_as`]: null matches null, so a null key forms one group exactly like
/// any other value.
#[derive(Debug, Clone)]
pub struct Key(pub Vec<Value>);

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.same_as(b))
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.0 {
            hash_value(v, state);
        }
    }
}

fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    std::mem::discriminant(v).hash(state);
    match v {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int64(i) => i.hash(state),
        Value::Float64(f) => float_bits(*f).hash(state),
        Value::Timestamp(t) => t.hash(state),
        Value::Date(d) => d.hash(state),
        Value::Time(t) => t.hash(state),
        Value::Utf8(s) => s.hash(state),
        Value::Geometry(p) => {
            float_bits(p.x).hash(state);
            float_bits(p.y).hash(state);
            p.srid.hash(state);
        }
    }
}

/// Resolved positions of key columns within one schema.
#[derive(Debug, Clone)]
pub struct KeyColumns {
    idxs: Vec<usize>,
}

impl KeyColumns {
    /// Resolve `columns` against `schema`.
    pub fn resolve(schema: &Schema, columns: &[String]) -> MergeResult<Self> {
        let idxs = columns
            .iter()
            .map(|c| {
                schema.index_of(c).ok_or_else(|| {
                    MergeError::schema_mismatch(format!(
                        "key column '{c}' not found. columns={:?}",
                        schema.field_names().collect::<Vec<_>>()
                    ))
                })
            })
            .collect::<MergeResult<Vec<_>>>()?;
        Ok(Self { idxs })
    }

    /// Extract the key of `row`.
    pub fn key_of(&self, row: &[Value]) -> Key {
        Key(self.idxs.iter().map(|&i| row[i].clone()).collect())
    }

    pub fn positions(&self) -> &[usize] {
        &self.idxs
    }
}
