//! Reading CSV extracts.
//!
//! - [`extract`]: where an extract's bytes come from ([`FileExtract`], [`BytesExtract`])
//! - [`infer`]: column types for a dataset's first historical table
//! - [`csv`]: header mapping and typed value parsing used by staging

pub mod csv;
pub mod extract;
pub mod infer;

pub use extract::{BytesExtract, ExtractSource, FileExtract};
pub use infer::{infer_schema, infer_schema_from_csv};
