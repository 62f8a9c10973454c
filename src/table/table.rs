//! Table - named set of equal-length columns plus their indices.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::common::config::IndexOptions;
use crate::common::{Error, Result, RowId};
use crate::index::{EncodedKey, Index};
use crate::storage::stream::{put_string, string_len};
use crate::storage::{ObjectType, Storage, Stream};
use crate::table::row::column_index_error;
use crate::table::{Column, Conditions, Row, RowMut, RowValues, Searcher};
use crate::value::{Value, ValueCodec};

/// A table.
///
/// # Stream Layout
/// ```text
/// ┌──────┬────────────────┬───────────────┬───────────────┬──────────────┬─────────────┐
/// │ name │ row_count (i32)│ col_count(i32)│ idx_count(i32)│ column names │ index names │
/// └──────┴────────────────┴───────────────┴───────────────┴──────────────┴─────────────┘
/// ```
/// The whole header is rewritten when a column or index is added or
/// dropped; [`flush`](Table::flush) rewrites only `row_count`.
///
/// # Invariants
/// - After every insert, `row_count` equals the cell count of every column.
/// - Every index holds exactly the ordinals `0..row_count`.
///
/// # Thread Safety
/// Mutation needs `&mut self`. Callers serialize writers; reads through
/// `&self` may page index nodes in but never change table data.
pub struct Table {
    storage: Arc<dyn Storage>,
    name: String,
    stream: Stream,
    codec: Arc<dyn ValueCodec>,
    row_count: u32,
    columns: Vec<Column>,
    indices: Vec<Index>,
}

impl Table {
    /// Create an empty table with no columns.
    ///
    /// # Errors
    /// `Error::ObjectExists` if a table with this name exists in `storage`.
    pub fn create(
        storage: Arc<dyn Storage>,
        name: &str,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        let stream = storage.create(name, "", ObjectType::Table)?;

        let table = Self {
            storage,
            name: name.to_string(),
            stream,
            codec,
            row_count: 0,
            columns: Vec::new(),
            indices: Vec::new(),
        };
        table.write_header()?;

        tracing::debug!(table = name, "table created");
        Ok(table)
    }

    /// Create a table with the given columns.
    pub fn create_with_columns(
        storage: Arc<dyn Storage>,
        name: &str,
        columns: &[&str],
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        let mut table = Self::create(storage, name, codec)?;
        for column in columns {
            table.create_column(column)?;
        }
        Ok(table)
    }

    /// Open an existing table with its columns and indices.
    ///
    /// # Errors
    /// - `Error::ObjectNotFound` if the table or one of its objects is missing
    /// - `Error::StructuralInconsistency` if a column's flushed cell count
    ///   differs from the table's row count
    pub fn open(storage: Arc<dyn Storage>, name: &str, codec: Arc<dyn ValueCodec>) -> Result<Self> {
        let stream = storage.open(name, "", ObjectType::Table)?;

        let mut cursor = stream.cursor(0);
        let stored_name = cursor.read_string()?;
        if stored_name != name {
            return Err(Error::Corrupted(format!(
                "table stream for '{}' holds table '{}'",
                name, stored_name
            )));
        }
        let row_count = cursor.read_i32()?;
        let row_count = u32::try_from(row_count)
            .map_err(|_| Error::Corrupted(format!("negative row count {}", row_count)))?;
        let column_count = cursor.read_len()?;
        let index_count = cursor.read_len()?;

        let column_names = (0..column_count)
            .map(|_| cursor.read_string())
            .collect::<Result<Vec<_>>>()?;
        let index_names = (0..index_count)
            .map(|_| cursor.read_string())
            .collect::<Result<Vec<_>>>()?;

        let mut columns = Vec::with_capacity(column_names.len());
        for column in &column_names {
            let column = Column::open(storage.as_ref(), name, column, codec.clone())?;
            if column.cell_count() != row_count {
                return Err(Error::StructuralInconsistency(format!(
                    "column '{}' has {} cells, table '{}' has {} rows",
                    column.name(),
                    column.cell_count(),
                    name,
                    row_count
                )));
            }
            columns.push(column);
        }

        let indices = index_names
            .iter()
            .map(|index| Index::open(storage.as_ref(), name, index))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            table = name,
            rows = row_count,
            columns = columns.len(),
            indices = indices.len(),
            "table opened"
        );

        Ok(Self {
            storage,
            name: name.to_string(),
            stream,
            codec,
            row_count,
            columns,
            indices,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indices.iter().find(|i| i.name() == name)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Add a column. Existing rows get [`Value::Null`] in it.
    ///
    /// # Errors
    /// `Error::ObjectExists` if the table already has such a column.
    pub fn create_column(&mut self, name: &str) -> Result<()> {
        if self.column(name).is_some() {
            return Err(Error::ObjectExists {
                kind: ObjectType::Column,
                name: name.to_string(),
            });
        }

        let column = Column::create(
            self.storage.as_ref(),
            &self.name,
            name,
            self.row_count,
            self.codec.clone(),
        )?;
        self.columns.push(column);
        self.write_header()
    }

    /// Remove a column from the table. Its streams stay in storage.
    ///
    /// # Errors
    /// - `Error::ColumnNotFound` if there is no such column
    /// - `Error::ColumnInUse` if an index covers it
    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let position = self.column_position(name)?;
        if let Some(index) = self.indices.iter().find(|i| i.covers_column(name)) {
            return Err(Error::ColumnInUse {
                column: name.to_string(),
                index: index.name().to_string(),
            });
        }

        self.columns.remove(position);
        tracing::debug!(table = %self.name, column = name, "column dropped");
        self.write_header()
    }

    /// Create an index over `columns` and build it from the existing rows.
    ///
    /// # Errors
    /// - `Error::ObjectExists` if an index with this name exists
    /// - `Error::ColumnNotFound` for an unknown column
    /// - `Error::DuplicateKey` if the index is unique and existing rows
    ///   repeat a value
    pub fn create_index(&mut self, name: &str, columns: &[&str], options: IndexOptions) -> Result<()> {
        if self.index(name).is_some() {
            return Err(Error::ObjectExists {
                kind: ObjectType::Index,
                name: name.to_string(),
            });
        }

        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let index = Index::create(
            self.storage.as_ref(),
            &self.name,
            name,
            &columns,
            &self.columns,
            options,
        )?;
        self.indices.push(index);
        self.write_header()
    }

    /// Remove an index from the table. Its stream stays in storage.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let position = self
            .indices
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;

        self.indices.remove(position);
        tracing::debug!(table = %self.name, index = name, "index dropped");
        self.write_header()
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Append one row and flush. Columns missing from `values` get
    /// [`Value::Null`].
    ///
    /// # Errors
    /// - `Error::ColumnNotFound` if `values` names an unknown column
    /// - `Error::DuplicateKey` if a unique index already holds the values;
    ///   nothing is written in that case
    pub fn insert(&mut self, values: &RowValues) -> Result<RowId> {
        let row = self.insert_row(values)?;
        self.flush()?;
        Ok(row)
    }

    /// Append many rows and flush once at the end.
    ///
    /// Stops at the first failing row; rows before it stay inserted but
    /// are only durable after the next flush.
    pub fn bulk_insert<'v, I>(&mut self, rows: I) -> Result<Vec<RowId>>
    where
        I: IntoIterator<Item = &'v RowValues>,
    {
        let inserted = rows
            .into_iter()
            .map(|values| self.insert_row(values))
            .collect::<Result<Vec<_>>>()?;
        self.flush()?;

        tracing::debug!(table = %self.name, rows = inserted.len(), "bulk insert");
        Ok(inserted)
    }

    /// Overwrite one cell, keeping covering indices in step.
    ///
    /// # Errors
    /// - `Error::OutOfRange` if `row` is past the last row
    /// - `Error::ColumnNotFound` for an unknown column
    /// - `Error::DuplicateKey` if a unique index would hold the new values
    ///   twice; the cell is left unchanged
    pub fn update(&mut self, row: RowId, column: &str, value: Value) -> Result<()> {
        self.check_row(row)?;
        let position = self.column_position(column)?;
        let bytes = self.columns[position].encode(&value)?;

        let covering: Vec<usize> = self
            .indices
            .iter()
            .enumerate()
            .filter(|(_, index)| index.covers_column(column))
            .map(|(i, _)| i)
            .collect();

        for &i in &covering {
            let index = &self.indices[i];
            if !index.is_unique() {
                continue;
            }
            let mut key = EncodedKey::new();
            for name in index.columns() {
                let cell = if name == column {
                    bytes.clone()
                } else {
                    self.column_by_name(name)?.read_bytes(row)?
                };
                key.insert(name.clone(), cell);
            }
            if !index.conflicts(&self.columns, &key, Some(row))?.is_empty() {
                return Err(Error::DuplicateKey { row: row.0 });
            }
        }

        for &i in &covering {
            self.indices[i].delete(&self.columns, row)?;
        }
        self.columns[position].write_bytes(row, &bytes)?;
        for &i in &covering {
            self.indices[i].insert(&self.columns, row)?;
        }

        self.flush_indices(&covering)
    }

    /// View of row `ordinal`.
    ///
    /// # Errors
    /// `Error::OutOfRange` if `ordinal >= row_count`.
    pub fn row(&self, ordinal: u32) -> Result<Row<'_>> {
        let row = RowId::new(ordinal);
        self.check_row(row)?;
        Ok(Row::new(self, row))
    }

    pub fn row_mut(&mut self, ordinal: u32) -> Result<RowMut<'_>> {
        let row = RowId::new(ordinal);
        self.check_row(row)?;
        Ok(RowMut::new(self, row))
    }

    /// Every row in ordinal order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.row_count).map(move |i| Row::new(self, RowId::new(i)))
    }

    /// Rows matching every condition, in ordinal order.
    ///
    /// # Errors
    /// `Error::UnresolvableCondition` if `conditions` is empty or names an
    /// unknown column.
    pub fn search(&self, conditions: &Conditions) -> Result<Vec<Row<'_>>> {
        let searcher = Searcher::new(conditions, &self.columns, &self.indices)?;
        Ok(searcher
            .search()?
            .into_iter()
            .map(|row| Row::new(self, row))
            .collect())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist the row count, every column's cell count, and every index.
    pub fn flush(&self) -> Result<()> {
        self.stream
            .write_i32_at(string_len(&self.name), self.row_count as i32)?;
        for column in &self.columns {
            column.flush()?;
        }
        for index in &self.indices {
            index.flush()?;
        }
        Ok(())
    }

    /// Check that every column holds `row_count` cells and every index tree
    /// is well formed and holds every row.
    pub fn check(&self) -> Result<()> {
        for column in &self.columns {
            if column.cell_count() != self.row_count {
                return Err(Error::StructuralInconsistency(format!(
                    "column '{}' has {} cells, table has {} rows",
                    column.name(),
                    column.cell_count(),
                    self.row_count
                )));
            }
        }
        for index in &self.indices {
            index.validate(&self.columns)?;
            let entries = index.len()?;
            if entries != self.row_count as usize {
                return Err(Error::StructuralInconsistency(format!(
                    "index '{}' holds {} entries, table has {} rows",
                    index.name(),
                    entries,
                    self.row_count
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn column_by_name(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    pub(crate) fn column_at(&self, index: usize) -> Result<&Column> {
        self.columns
            .get(index)
            .ok_or_else(|| column_index_error(index, self.columns.len()))
    }

    fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    fn check_row(&self, row: RowId) -> Result<()> {
        if row.0 >= self.row_count {
            return Err(Error::OutOfRange {
                index: row.0 as u64,
                count: self.row_count as u64,
            });
        }
        Ok(())
    }

    fn insert_row(&mut self, values: &RowValues) -> Result<RowId> {
        let known: HashSet<&str> = self.columns.iter().map(Column::name).collect();
        let mut unknown: Vec<&String> = values
            .keys()
            .filter(|name| !known.contains(name.as_str()))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(Error::ColumnNotFound(name.to_string()));
        }

        let row = RowId::new(self.row_count);
        let cells = self
            .columns
            .iter()
            .map(|c| c.encode(values.get(c.name()).unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>>>()?;

        for index in self.indices.iter().filter(|i| i.is_unique()) {
            let mut key = EncodedKey::new();
            for (column, cell) in self.columns.iter().zip(&cells) {
                if index.covers_column(column.name()) {
                    key.insert(column.name().to_string(), cell.clone());
                }
            }
            if !index.conflicts(&self.columns, &key, None)?.is_empty() {
                return Err(Error::DuplicateKey { row: row.0 });
            }
        }

        for (column, cell) in self.columns.iter_mut().zip(&cells) {
            let stored = column.insert_bytes(cell)?;
            if stored != row {
                return Err(Error::StructuralInconsistency(format!(
                    "column '{}' appended row {} while the table is at row {}",
                    column.name(),
                    stored,
                    row
                )));
            }
        }
        for index in &self.indices {
            index.insert(&self.columns, row)?;
        }

        self.row_count += 1;
        Ok(row)
    }

    fn flush_indices(&self, positions: &[usize]) -> Result<()> {
        for &i in positions {
            self.indices[i].flush()?;
        }
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let mut header = Vec::new();
        put_string(&mut header, &self.name);
        header.extend_from_slice(&(self.row_count as i32).to_le_bytes());
        header.extend_from_slice(&(self.columns.len() as i32).to_le_bytes());
        header.extend_from_slice(&(self.indices.len() as i32).to_le_bytes());
        for column in &self.columns {
            put_string(&mut header, column.name());
        }
        for index in &self.indices {
            put_string(&mut header, index.name());
        }

        self.stream.write_at(0, &header)?;
        self.stream.resize(header.len() as u64)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("row_count", &self.row_count)
            .field("columns", &self.column_names())
            .field(
                "indices",
                &self.indices.iter().map(Index::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
