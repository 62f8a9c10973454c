//! Table layer - columns, rows, and condition search.
//!
//! - [`Column`] - Offset vector over a blob heap, one cell per row
//! - [`Table`] - Columns plus indices, with insert, update, and search
//! - [`Row`] / [`RowMut`] - Views of one row
//! - [`Searcher`] - Plans a condition map into index and column scans

use std::collections::HashMap;

use crate::value::Value;

mod column;
mod row;
mod searcher;
#[allow(clippy::module_inception)]
mod table;

pub use column::Column;
pub use row::{Row, RowMut};
pub use searcher::{PlanStep, Searcher};
pub use table::Table;

/// Equality conditions keyed by column name, combined with AND.
pub type Conditions = HashMap<String, Value>;

/// Cell values of one row keyed by column name.
pub type RowValues = HashMap<String, Value>;
