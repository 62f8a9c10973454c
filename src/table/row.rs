//! Row views over a table's columns.

use std::fmt;

use crate::common::{Error, Result, RowId};
use crate::table::{RowValues, Table};
use crate::value::Value;

/// Read-only view of one row.
///
/// Holds only the ordinal; every access reads the cell from its column.
#[derive(Clone, Copy)]
pub struct Row<'t> {
    table: &'t Table,
    ordinal: RowId,
}

impl<'t> Row<'t> {
    pub(crate) fn new(table: &'t Table, ordinal: RowId) -> Self {
        Self { table, ordinal }
    }

    pub fn ordinal(&self) -> RowId {
        self.ordinal
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Result<Value> {
        self.table.column_by_name(column)?.read(self.ordinal)
    }

    /// Value of the column at position `index` in table order.
    pub fn get_at(&self, index: usize) -> Result<Value> {
        self.table.column_at(index)?.read(self.ordinal)
    }

    /// Stored bytes of the column at position `index`.
    pub fn bytes_at(&self, index: usize) -> Result<Vec<u8>> {
        self.table.column_at(index)?.read_bytes(self.ordinal)
    }

    /// `(column, value)` pairs in table order.
    pub fn values(&self) -> Result<Vec<(String, Value)>> {
        self.table
            .columns()
            .iter()
            .map(|c| Ok((c.name().to_string(), c.read(self.ordinal)?)))
            .collect()
    }

    /// The row as a column-name map, the shape [`Table::insert`] takes.
    pub fn to_values(&self) -> Result<RowValues> {
        Ok(self.values()?.into_iter().collect())
    }
}

impl fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("table", &self.table.name())
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// Mutable view of one row. Writes go through [`Table::update`] so that
/// indices stay consistent.
pub struct RowMut<'t> {
    table: &'t mut Table,
    ordinal: RowId,
}

impl<'t> RowMut<'t> {
    pub(crate) fn new(table: &'t mut Table, ordinal: RowId) -> Self {
        Self { table, ordinal }
    }

    pub fn ordinal(&self) -> RowId {
        self.ordinal
    }

    pub fn get(&self, column: &str) -> Result<Value> {
        Row::new(&*self.table, self.ordinal).get(column)
    }

    pub fn get_at(&self, index: usize) -> Result<Value> {
        Row::new(&*self.table, self.ordinal).get_at(index)
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        self.table.update(self.ordinal, column, value.into())
    }

    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let name = self.table.column_at(index)?.name().to_string();
        self.table.update(self.ordinal, &name, value.into())
    }
}

impl fmt::Debug for RowMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowMut")
            .field("table", &self.table.name())
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

pub(crate) fn column_index_error(index: usize, count: usize) -> Error {
    Error::OutOfRange {
        index: index as u64,
        count: count as u64,
    }
}
