//! Column - named vector of offsets into a blob heap.

use std::fmt;
use std::sync::Arc;

use crate::common::config::POSITION_SLOT_SIZE;
use crate::common::{Error, Result, RowId};
use crate::storage::stream::{put_string, string_len};
use crate::storage::{BlobStore, ObjectType, Storage, Stream};
use crate::value::{Value, ValueCodec};

/// One column of a table.
///
/// # Stream Layout
/// ```text
/// ┌───────────────┬──────────┬─────────────────┬─────────────┬─────┐
/// │ name_len (i32)│ name     │ cell_count (i32)│ slot 0 (i64)│ ... │
/// └───────────────┴──────────┴─────────────────┴─────────────┴─────┘
/// ```
/// Slot `i` holds the [`BlobStore`] position of the encoded value of row
/// `i`. Values are encoded with the table's [`ValueCodec`] at the boundary;
/// the column itself only moves bytes.
///
/// `cell_count` lives in memory and reaches the header on
/// [`flush`](Column::flush).
pub struct Column {
    name: String,
    stream: Stream,
    store: BlobStore,
    codec: Arc<dyn ValueCodec>,
    cell_count: u32,
    /// Offset of slot 0.
    header_len: u64,
}

impl Column {
    /// Create a column whose first `init_count` cells hold [`Value::Null`].
    ///
    /// Used when a column is added to a table that already has rows; all
    /// pre-existing cells share one `Null` record.
    pub fn create(
        storage: &dyn Storage,
        table: &str,
        name: &str,
        init_count: u32,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        let stream = storage.create(name, table, ObjectType::Column)?;
        let store = BlobStore::create(storage, table, name)?;

        let mut header = Vec::new();
        put_string(&mut header, name);
        header.extend_from_slice(&(init_count as i32).to_le_bytes());
        let header_len = header.len() as u64;

        if init_count > 0 {
            let null_position = store.insert(&codec.encode(&Value::Null)?)?;
            let slot = (null_position as i64).to_le_bytes();
            header.reserve(init_count as usize * POSITION_SLOT_SIZE);
            for _ in 0..init_count {
                header.extend_from_slice(&slot);
            }
        }
        stream.write_at(0, &header)?;

        tracing::debug!(table, column = name, init_count, "column created");

        Ok(Self {
            name: name.to_string(),
            stream,
            store,
            codec,
            cell_count: init_count,
            header_len,
        })
    }

    /// Open an existing column and its blob heap.
    pub fn open(
        storage: &dyn Storage,
        table: &str,
        name: &str,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        let stream = storage.open(name, table, ObjectType::Column)?;

        let mut cursor = stream.cursor(0);
        let stored_name = cursor.read_string()?;
        if stored_name != name {
            return Err(Error::Corrupted(format!(
                "column stream for '{}' holds column '{}'",
                name, stored_name
            )));
        }
        let cell_count = cursor.read_i32()?;
        let cell_count = u32::try_from(cell_count)
            .map_err(|_| Error::Corrupted(format!("negative cell count {}", cell_count)))?;
        let header_len = cursor.position();

        let expected = header_len + cell_count as u64 * POSITION_SLOT_SIZE as u64;
        if stream.len()? < expected {
            return Err(Error::Corrupted(format!(
                "column '{}' claims {} cells but its stream is too short",
                name, cell_count
            )));
        }

        let store = BlobStore::open(storage, table, name)?;

        tracing::debug!(table, column = name, cell_count, "column opened");

        Ok(Self {
            name: name.to_string(),
            stream,
            store,
            codec,
            cell_count,
            header_len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    /// Encode a value the way this column stores it.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.codec.encode(value)
    }

    /// Raw stored bytes of cell `index`.
    ///
    /// # Errors
    /// `Error::OutOfRange` if `index >= cell_count`.
    pub fn read_bytes(&self, index: RowId) -> Result<Vec<u8>> {
        let slot = self.slot_position(index)?;
        let position = self.stream.read_i64_at(slot)?;
        let position = u64::try_from(position).map_err(|_| {
            Error::Corrupted(format!(
                "column '{}' cell {} points at {}",
                self.name, index.0, position
            ))
        })?;

        self.store.read(position)
    }

    /// Decoded value of cell `index`.
    pub fn read(&self, index: RowId) -> Result<Value> {
        let bytes = self.read_bytes(index)?;
        self.codec.decode(&bytes)
    }

    /// Point cell `index` at a new record holding `bytes`.
    ///
    /// The previous record stays in the heap, unreachable. `cell_count`
    /// never changes.
    pub fn write_bytes(&self, index: RowId, bytes: &[u8]) -> Result<()> {
        let slot = self.slot_position(index)?;
        let position = self.store.insert(bytes)?;
        self.stream.write_i64_at(slot, position as i64)
    }

    pub fn write(&self, index: RowId, value: &Value) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        self.write_bytes(index, &bytes)
    }

    /// Append a cell and return its row ordinal.
    pub fn insert(&mut self, value: &Value) -> Result<RowId> {
        let bytes = self.codec.encode(value)?;
        self.insert_bytes(&bytes)
    }

    pub fn insert_bytes(&mut self, bytes: &[u8]) -> Result<RowId> {
        if self.cell_count == i32::MAX as u32 {
            return Err(Error::OutOfRange {
                index: self.cell_count as u64,
                count: i32::MAX as u64,
            });
        }

        let position = self.store.insert(bytes)?;
        let row = RowId::new(self.cell_count);
        let slot = self.header_len + row.0 as u64 * POSITION_SLOT_SIZE as u64;
        self.stream.write_i64_at(slot, position as i64)?;

        self.cell_count += 1;
        Ok(row)
    }

    /// Persist `cell_count` into the header.
    pub fn flush(&self) -> Result<()> {
        let count_position = self.header_len - 4;
        self.stream
            .write_i32_at(count_position, self.cell_count as i32)
    }

    /// Decoded values of every cell in row order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Value>> + '_ {
        (0..self.cell_count).map(move |i| self.read(RowId::new(i)))
    }

    /// Size of the header written by [`create`](Column::create) for `name`.
    pub fn header_len_for(name: &str) -> u64 {
        string_len(name) + 4
    }

    fn slot_position(&self, index: RowId) -> Result<u64> {
        if index.0 >= self.cell_count {
            return Err(Error::OutOfRange {
                index: index.0 as u64,
                count: self.cell_count as u64,
            });
        }
        Ok(self.header_len + index.0 as u64 * POSITION_SLOT_SIZE as u64)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("cell_count", &self.cell_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::value::BincodeCodec;

    fn codec() -> Arc<dyn ValueCodec> {
        Arc::new(BincodeCodec)
    }

    #[test]
    fn test_insert_and_read() {
        let storage = MemoryStorage::new();
        let mut column = Column::create(&storage, "T", "Name", 0, codec()).unwrap();

        assert_eq!(column.insert(&Value::from("a")).unwrap(), RowId::new(0));
        assert_eq!(column.insert(&Value::from("b")).unwrap(), RowId::new(1));

        assert_eq!(column.cell_count(), 2);
        assert_eq!(column.read(RowId::new(0)).unwrap(), Value::from("a"));
        assert_eq!(column.read(RowId::new(1)).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_read_out_of_range() {
        let storage = MemoryStorage::new();
        let mut column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
        column.insert(&Value::Int(1)).unwrap();

        let err = column.read(RowId::new(1)).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { index: 1, count: 1 }));
    }

    #[test]
    fn test_overwrite_keeps_cell_count() {
        let storage = MemoryStorage::new();
        let mut column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
        column.insert(&Value::Int(1)).unwrap();
        column.insert(&Value::Int(2)).unwrap();

        column.write(RowId::new(0), &Value::Int(10)).unwrap();

        assert_eq!(column.cell_count(), 2);
        assert_eq!(column.read(RowId::new(0)).unwrap(), Value::Int(10));
        assert_eq!(column.read(RowId::new(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_write_past_end_fails() {
        let storage = MemoryStorage::new();
        let column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
        assert!(matches!(
            column.write(RowId::new(0), &Value::Int(1)),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_create_with_existing_rows() {
        let storage = MemoryStorage::new();
        let mut column = Column::create(&storage, "T", "Late", 3, codec()).unwrap();
        assert_eq!(column.cell_count(), 3);

        for i in 0..3 {
            assert_eq!(column.read(RowId::new(i)).unwrap(), Value::Null);
        }

        assert_eq!(column.insert(&Value::Int(4)).unwrap(), RowId::new(3));
        assert_eq!(column.read(RowId::new(3)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_flush_and_reopen() {
        let storage = MemoryStorage::new();
        {
            let mut column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
            for i in 0..5 {
                column.insert(&Value::Int(i)).unwrap();
            }
            column.flush().unwrap();
        }

        let column = Column::open(&storage, "T", "ID", codec()).unwrap();
        assert_eq!(column.cell_count(), 5);
        let values: Vec<Value> = column.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values, (0..5).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_unflushed_count_is_not_durable() {
        let storage = MemoryStorage::new();
        {
            let mut column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
            column.insert(&Value::Int(1)).unwrap();
        }

        let column = Column::open(&storage, "T", "ID", codec()).unwrap();
        assert_eq!(column.cell_count(), 0);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut column = Column::create(&storage, "T", "ID", 0, codec()).unwrap();
        column.insert(&Value::Int(1)).unwrap();

        column.flush().unwrap();
        let stream = storage.open("ID", "T", ObjectType::Column).unwrap();
        let len = stream.len().unwrap() as usize;
        let first = stream.read_vec_at(0, len).unwrap();

        column.flush().unwrap();
        let second = stream.read_vec_at(0, stream.len().unwrap() as usize).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_header_len() {
        let storage = MemoryStorage::new();
        Column::create(&storage, "T", "Name", 0, codec()).unwrap();
        let stream = storage.open("Name", "T", ObjectType::Column).unwrap();
        assert_eq!(stream.len().unwrap(), Column::header_len_for("Name"));
    }
}
