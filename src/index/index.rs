//! Index - named B+Tree over a subset of a table's columns.

use parking_lot::Mutex;

use crate::common::config::{validate_degree, IndexOptions, SortOrder, Uniqueness};
use crate::common::position::{decode_position, encode_position};
use crate::common::{Error, Result, RowId};
use crate::index::btree::BPlusTree;
use crate::index::comparator::{Comparator, EncodedKey};
use crate::storage::stream::{put_string, string_len};
use crate::storage::{ObjectType, Storage, Stream};
use crate::table::{Column, Conditions};

/// Secondary index over one or more columns of a table.
///
/// # Stream Layout
/// ```text
/// ┌──────────┬─────────────────┬────────────────┬───────────────┬──────────┐
/// │ name     │ sort_order (i32)│ tree_pos (i64) │ col_count(i32)│ columns  │
/// └──────────┴─────────────────┴────────────────┴───────────────┴──────────┘
///   followed by the tree header and its nodes
/// ```
/// Strings are `[i32 len][utf-8]`. `tree_pos` is rewritten on every flush.
///
/// The index owns no column data. Every operation takes the table's
/// columns and binds the covered ones into a [`Comparator`] for the call.
///
/// # Thread Safety
/// The tree sits behind a `Mutex` so that searches, which page nodes in,
/// can run through `&self`.
pub struct Index {
    name: String,
    stream: Stream,
    columns: Vec<String>,
    order: SortOrder,
    tree: Mutex<BPlusTree>,
}

impl Index {
    /// Create an index over `columns` and fill it from the rows already in
    /// `table_columns`.
    ///
    /// # Errors
    /// - `Error::Configuration` for a degree below 2
    /// - `Error::ColumnNotFound` if a covered column does not exist
    /// - `Error::DuplicateKey` if a unique index meets equal existing rows
    pub fn create(
        storage: &dyn Storage,
        table: &str,
        name: &str,
        columns: &[String],
        table_columns: &[Column],
        options: IndexOptions,
    ) -> Result<Self> {
        validate_degree(options.degree)?;
        if columns.is_empty() {
            return Err(Error::Configuration(format!(
                "index '{}' must cover at least one column",
                name
            )));
        }
        for column in columns {
            find_column(table_columns, column)?;
        }

        let stream = storage.create(name, table, ObjectType::Index)?;

        let mut header = Vec::new();
        put_string(&mut header, name);
        header.extend_from_slice(&(options.sort_order as i32).to_le_bytes());
        header.extend_from_slice(&encode_position(None).to_le_bytes());
        header.extend_from_slice(&(columns.len() as i32).to_le_bytes());
        for column in columns {
            put_string(&mut header, column);
        }
        stream.write_at(0, &header)?;

        let duplicates = options.uniqueness == Uniqueness::AllowDuplicates;
        let tree = BPlusTree::new(stream.clone(), options.degree, duplicates)?;

        let index = Self {
            name: name.to_string(),
            stream,
            columns: columns.to_vec(),
            order: options.sort_order,
            tree: Mutex::new(tree),
        };
        index.rebuild(table_columns)?;
        index.flush()?;

        tracing::debug!(
            table,
            index = name,
            columns = ?index.columns,
            unique = !duplicates,
            degree = options.degree,
            "index created"
        );

        Ok(index)
    }

    /// Open an existing index.
    pub fn open(storage: &dyn Storage, table: &str, name: &str) -> Result<Self> {
        let stream = storage.open(name, table, ObjectType::Index)?;

        let mut cursor = stream.cursor(0);
        let stored_name = cursor.read_string()?;
        if stored_name != name {
            return Err(Error::Corrupted(format!(
                "index stream for '{}' holds index '{}'",
                name, stored_name
            )));
        }
        let order = SortOrder::from_i32(cursor.read_i32()?)?;
        let tree_position = decode_position(cursor.read_i64()?)?;
        let column_count = cursor.read_len()?;
        let columns = (0..column_count)
            .map(|_| cursor.read_string())
            .collect::<Result<Vec<_>>>()?;

        let tree_position = tree_position.ok_or_else(|| {
            Error::Corrupted(format!("index '{}' was never flushed", name))
        })?;
        let tree = BPlusTree::open(stream.clone(), tree_position)?;

        tracing::debug!(table, index = name, height = tree.height(), "index opened");

        Ok(Self {
            name: name.to_string(),
            stream,
            columns,
            order,
            tree: Mutex::new(tree),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Covered column names, in comparison order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn covers_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    pub fn is_unique(&self) -> bool {
        !self.tree.lock().allows_duplicates()
    }

    pub fn height(&self) -> u32 {
        self.tree.lock().height()
    }

    pub fn degree(&self) -> u32 {
        self.tree.lock().degree()
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> Result<usize> {
        self.tree.lock().len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.tree.lock().is_empty()
    }

    /// Bind the covered columns of `table_columns`.
    pub fn comparator<'a>(&self, table_columns: &'a [Column]) -> Result<Comparator<'a>> {
        let columns = self
            .columns
            .iter()
            .map(|name| find_column(table_columns, name))
            .collect::<Result<Vec<_>>>()?;

        let tie_break = !self.is_unique();
        Ok(Comparator::new(columns, self.order, tie_break))
    }

    /// Encode the condition values for the columns this index covers.
    /// Conditions on other columns are ignored.
    pub fn encode_conditions(
        &self,
        table_columns: &[Column],
        conditions: &Conditions,
    ) -> Result<EncodedKey> {
        let mut key = EncodedKey::new();
        for name in &self.columns {
            if let Some(value) = conditions.get(name) {
                let column = find_column(table_columns, name)?;
                key.insert(name.clone(), column.encode(value)?);
            }
        }
        Ok(key)
    }

    /// Rows whose covered values equal the conditions.
    ///
    /// Conditions covering every index column use the tree order; a subset
    /// falls back to [`full_scan`](Index::full_scan).
    pub fn search(&self, table_columns: &[Column], conditions: &Conditions) -> Result<Vec<RowId>> {
        let cmp = self.comparator(table_columns)?;
        let key = self.encode_conditions(table_columns, conditions)?;

        let mut tree = self.tree.lock();
        if cmp.covers(&key) {
            tree.search(&cmp, &key)
        } else {
            tree.full_scan(&cmp, &key)
        }
    }

    /// Rows matching the conditions, found by visiting every tree node.
    pub fn full_scan(
        &self,
        table_columns: &[Column],
        conditions: &Conditions,
    ) -> Result<Vec<RowId>> {
        let cmp = self.comparator(table_columns)?;
        let key = self.encode_conditions(table_columns, conditions)?;
        self.tree.lock().full_scan(&cmp, &key)
    }

    /// Rows other than `except` whose covered values equal `key`.
    ///
    /// Used to check a unique index before a row is written.
    pub fn conflicts(
        &self,
        table_columns: &[Column],
        key: &EncodedKey,
        except: Option<RowId>,
    ) -> Result<Vec<RowId>> {
        let cmp = self.comparator(table_columns)?;
        let mut found = self.tree.lock().search(&cmp, key)?;
        found.retain(|row| Some(*row) != except);
        Ok(found)
    }

    /// Add `row`, whose cells must already be written.
    pub fn insert(&self, table_columns: &[Column], row: RowId) -> Result<()> {
        let cmp = self.comparator(table_columns)?;
        self.tree.lock().insert(&cmp, row)
    }

    /// Remove `row`, whose cells must still hold the indexed values.
    pub fn delete(&self, table_columns: &[Column], row: RowId) -> Result<bool> {
        let cmp = self.comparator(table_columns)?;
        self.tree.lock().delete(&cmp, row)
    }

    /// Clear the tree and reinsert every row `0..count`.
    ///
    /// # Errors
    /// `Error::StructuralInconsistency` if the covered columns disagree on
    /// their cell count.
    pub fn rebuild(&self, table_columns: &[Column]) -> Result<()> {
        let cmp = self.comparator(table_columns)?;

        let mut counts = self
            .columns
            .iter()
            .map(|name| find_column(table_columns, name).map(Column::cell_count));
        let count = counts.next().transpose()?.unwrap_or(0);
        for other in counts {
            let other = other?;
            if other != count {
                return Err(Error::StructuralInconsistency(format!(
                    "index '{}' covers columns with {} and {} cells",
                    self.name, count, other
                )));
            }
        }

        let mut tree = self.tree.lock();
        tree.clear();
        for row in 0..count {
            tree.insert(&cmp, RowId::new(row))?;
        }

        tracing::debug!(index = %self.name, rows = count, height = tree.height(), "index rebuilt");
        Ok(())
    }

    /// Flush the tree and record its position in the header.
    pub fn flush(&self) -> Result<()> {
        let tree_position = self.tree.lock().flush()?;
        self.stream
            .write_i64_at(self.tree_position_offset(), encode_position(Some(tree_position)))
    }

    /// Check the tree's structural invariants.
    pub fn validate(&self, table_columns: &[Column]) -> Result<()> {
        let cmp = self.comparator(table_columns)?;
        self.tree.lock().validate(&cmp)
    }

    fn tree_position_offset(&self) -> u64 {
        string_len(&self.name) + 4
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("order", &self.order)
            .finish()
    }
}

fn find_column<'a>(table_columns: &'a [Column], name: &str) -> Result<&'a Column> {
    table_columns
        .iter()
        .find(|c| c.name() == name)
        .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
}
