//! Dataset descriptors.
//!
//! A [`DatasetDescriptor`] names a dataset, its business key, and the columns that feed the
//! master relation. It is supplied by the caller (typically a schema registry) and must stay the
//! same across runs of one dataset.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::types::Schema;

/// Dataset name reserved for the shared master relation.
const RESERVED_NAME: &str = "master";

/// Describes one dataset to the merge engine.
///
/// ```
/// use rust_data_history::descriptor::DatasetDescriptor;
///
/// let d = DatasetDescriptor::new("potholes311", ["request_id"])
///     .with_location("street_address")
///     .with_coordinates("latitude", "longitude")
///     .with_observed_date("creation_date");
/// assert!(d.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset_name: String,
    pub business_key: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub observed_date: Option<String>,
}

impl DatasetDescriptor {
    pub fn new<I, S>(dataset_name: impl Into<String>, business_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dataset_name: dataset_name.into(),
            business_key: business_key.into_iter().map(Into::into).collect(),
            location: None,
            latitude: None,
            longitude: None,
            observed_date: None,
        }
    }

    pub fn with_location(mut self, column: impl Into<String>) -> Self {
        self.location = Some(column.into());
        self
    }

    pub fn with_coordinates(
        mut self,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
    ) -> Self {
        self.latitude = Some(latitude.into());
        self.longitude = Some(longitude.into());
        self
    }

    pub fn with_observed_date(mut self, column: impl Into<String>) -> Self {
        self.observed_date = Some(column.into());
        self
    }

    /// Decode a descriptor from JSON.
    pub fn from_json_str(s: &str) -> MergeResult<Self> {
        let d: Self = serde_json::from_str(s)?;
        d.validate()?;
        Ok(d)
    }

    /// Read a JSON descriptor from disk.
    pub fn from_json_path(path: impl AsRef<Path>) -> MergeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check that the descriptor can name relations and key a merge.
    pub fn validate(&self) -> MergeResult<()> {
        let name = &self.dataset_name;
        if name.is_empty() {
            return Err(MergeError::invalid_descriptor("dataset name is empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(MergeError::invalid_descriptor(format!(
                "dataset name '{name}' may only contain [a-z0-9_]"
            )));
        }
        if name == RESERVED_NAME {
            return Err(MergeError::invalid_descriptor(format!(
                "dataset name '{RESERVED_NAME}' is reserved"
            )));
        }
        if self.business_key.is_empty() {
            return Err(MergeError::invalid_descriptor(format!(
                "dataset '{name}' declares no business key"
            )));
        }
        for (i, col) in self.business_key.iter().enumerate() {
            if self.business_key[..i].contains(col) {
                return Err(MergeError::invalid_descriptor(format!(
                    "business key column '{col}' listed twice"
                )));
            }
        }
        Ok(())
    }

    /// Check every declared column against the historical table's schema.
    pub fn check_columns(&self, schema: &Schema) -> MergeResult<()> {
        let declared = self.business_key.iter().map(|c| ("business key", c)).chain(
            [
                ("location", &self.location),
                ("latitude", &self.latitude),
                ("longitude", &self.longitude),
                ("observed date", &self.observed_date),
            ]
            .into_iter()
            .filter_map(|(role, col)| col.as_ref().map(|c| (role, c))),
        );

        for (role, col) in declared {
            if schema.index_of(col).is_none() {
                return Err(MergeError::schema_mismatch(format!(
                    "{role} column '{col}' of dataset '{}' not found. columns={:?}",
                    self.dataset_name,
                    schema.field_names().collect::<Vec<_>>()
                )));
            }
        }
        Ok(())
    }
}
