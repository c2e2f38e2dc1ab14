use crate::types::{DataSet, Schema};

/// A named relation held by a [`super::Database`].
///
/// `version` advances on every committed write or recreation; transactions use it to detect
/// concurrent modification.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) name: String,
    pub(crate) data: DataSet,
    pub(crate) version: u64,
}

impl Table {
    pub(crate) fn new(name: impl Into<String>, data: DataSet, version: u64) -> Self {
        Self {
            name: name.into(),
            data,
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.data.schema
    }

    pub fn data(&self) -> &DataSet {
        &self.data
    }

    pub fn row_count(&self) -> usize {
        self.data.row_count()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}
