use thiserror::Error;

use crate::observability::Severity;

/// Convenience result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Error type returned by every stage of the merge pipeline.
///
/// A single enum is shared by staging, deduplication, delta detection, versioning and projection,
/// so callers can match on the failure kind without caring which stage produced it.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The extract could not be opened or read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The extract is not valid CSV.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The extract does not have the shape of the existing historical table.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A row has the wrong arity or a value that does not parse under its column type.
    #[error("bad row {row} column '{column}': {message} (raw='{raw}')")]
    BadRow {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// The dataset descriptor cannot be used to name or merge a dataset.
    #[error("invalid descriptor: {message}")]
    InvalidDescriptor { message: String },

    /// Another run touched the same dataset concurrently.
    #[error("conflict on dataset '{dataset}': {message}")]
    Conflict { dataset: String, message: String },

    /// A failure after the versioning transaction began; nothing was applied.
    #[error("partial write during {stage}, transaction rolled back: {source}")]
    PartialWrite {
        stage: &'static str,
        #[source]
        source: Box<MergeError>,
    },

    /// A relation was expected to exist but does not.
    #[error("unknown relation '{name}'")]
    UnknownRelation { name: String },

    /// A configuration or descriptor file could not be decoded.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl MergeError {
    pub(crate) fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// Classify the failure for observers and alert thresholds.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Io(_) => Severity::Critical,
            Self::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            Self::PartialWrite { .. } => Severity::Critical,
            Self::Conflict { .. } => Severity::Warning,
            Self::SchemaMismatch { .. }
            | Self::BadRow { .. }
            | Self::InvalidDescriptor { .. }
            | Self::UnknownRelation { .. }
            | Self::Config(_) => Severity::Error,
        }
    }

    /// True for failures that the caller is expected to retry once the other run completes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
            || matches!(self, Self::PartialWrite { source, .. } if source.is_retryable())
    }
}
