//! Comparator - orders row ordinals by the column values they point at.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::common::config::SortOrder;
use crate::common::{Result, RowId};
use crate::table::Column;

/// Condition values already encoded with the columns' codec, keyed by
/// column name.
pub type EncodedKey = HashMap<String, Vec<u8>>;

/// Compare two encoded cells: shorter arrays sort first, equal-length
/// arrays compare byte by byte.
#[inline]
pub fn compare_bytes(x: &[u8], y: &[u8]) -> Ordering {
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

/// Orders row ordinals by the bytes stored for them in a fixed list of
/// columns.
///
/// An index tree stores only row ordinals; the sort key of each ordinal is
/// derived on demand by reading its cells, so no key is stored twice.
///
/// # Ordering
/// Columns are compared in the order given; the first column that differs
/// decides. [`SortOrder::Descending`] flips the sign of that decision.
///
/// With `tie_break` set (trees that allow duplicates) rows whose values
/// are all equal are further ordered by ordinal. That makes every entry of
/// such a tree distinct, so a specific ordinal can be found and deleted.
/// Condition comparisons ([`compare_encoded`](Comparator::compare_encoded))
/// never tie-break.
pub struct Comparator<'a> {
    columns: Vec<&'a Column>,
    order: SortOrder,
    tie_break: bool,
}

impl<'a> Comparator<'a> {
    pub fn new(columns: Vec<&'a Column>, order: SortOrder, tie_break: bool) -> Self {
        Self {
            columns,
            order,
            tie_break,
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| c.name())
    }

    /// True if `key` carries a value for every bound column.
    pub fn covers(&self, key: &EncodedKey) -> bool {
        self.columns.iter().all(|c| key.contains_key(c.name()))
    }

    /// Compare the column values of two rows.
    pub fn compare_rows(&self, x: RowId, y: RowId) -> Result<Ordering> {
        for column in &self.columns {
            let x_bytes = column.read_bytes(x)?;
            let y_bytes = column.read_bytes(y)?;

            let order = compare_bytes(&x_bytes, &y_bytes);
            if order != Ordering::Equal {
                return Ok(self.directed(order));
            }
        }
        Ok(Ordering::Equal)
    }

    /// Tree order of two keys: [`compare_rows`](Comparator::compare_rows),
    /// then the ordinal if tie-breaking.
    pub fn compare_keys(&self, x: RowId, y: RowId) -> Result<Ordering> {
        let order = self.compare_rows(x, y)?;
        if order == Ordering::Equal && self.tie_break {
            return Ok(x.cmp(&y));
        }
        Ok(order)
    }

    /// Compare condition values against the stored values of `y`.
    ///
    /// Only bound columns present in `x` take part, in bound order.
    pub fn compare_encoded(&self, x: &EncodedKey, y: RowId) -> Result<Ordering> {
        for column in &self.columns {
            let Some(x_bytes) = x.get(column.name()) else {
                continue;
            };
            let y_bytes = column.read_bytes(y)?;

            let order = compare_bytes(x_bytes, &y_bytes);
            if order != Ordering::Equal {
                return Ok(self.directed(order));
            }
        }
        Ok(Ordering::Equal)
    }

    fn directed(&self, order: Ordering) -> Ordering {
        match self.order {
            SortOrder::Ascending => order,
            SortOrder::Descending => order.reverse(),
        }
    }
}
