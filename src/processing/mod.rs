//! Set-based relational operators over [`crate::types::DataSet`].
//!
//! Every merge stage is expressed with these operators instead of per-row application logic:
//!
//! - [`filter()`] / [`filter_eq()`]: row selection
//! - [`project()`]: column selection and reordering
//! - [`anti_join()`]: rows whose key is absent from another relation
//! - [`group_max()`]: one row per key, chosen by the greatest ordering value
//!
//! Keys compare with null-safe equality (see [`Key`]), so grouping and joining agree on what
//! "the same business key" means.

pub mod filter;
pub mod group;
pub mod join;
pub mod key;
pub mod project;

pub use filter::{filter, filter_eq};
pub use group::group_max;
pub use join::{anti_join, id_set, index_by_key, rows_with_ids};
pub use key::{Key, KeyColumns};
pub use project::project;
