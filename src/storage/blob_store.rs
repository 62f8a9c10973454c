//! Blob Store - append-only heap of length-prefixed byte records.

use crate::common::{Error, Result};
use crate::storage::{ObjectType, Storage, Stream};

/// Append-only record heap.
///
/// # Record Layout
/// ```text
/// ┌──────────────┬─────────────────────┐
/// │ length (i32) │ payload (length B)  │
/// └──────────────┴─────────────────────┘
/// ```
///
/// A record is addressed only by the offset of its length field. Records
/// are never modified or reclaimed: overwriting a cell appends a new record
/// and leaves the old one unreachable.
#[derive(Debug, Clone)]
pub struct BlobStore {
    stream: Stream,
}

impl BlobStore {
    pub fn new(stream: Stream) -> Self {
        Self { stream }
    }

    /// Open the heap of `column` in `table`.
    pub fn open(storage: &dyn Storage, table: &str, column: &str) -> Result<Self> {
        Ok(Self::new(storage.open(column, table, ObjectType::Store)?))
    }

    /// Create the heap of `column` in `table`.
    pub fn create(storage: &dyn Storage, table: &str, column: &str) -> Result<Self> {
        Ok(Self::new(storage.create(column, table, ObjectType::Store)?))
    }

    /// Append a record and return its position.
    pub fn insert(&self, bytes: &[u8]) -> Result<u64> {
        let len = i32::try_from(bytes.len()).map_err(|_| {
            Error::Serialization(format!("record of {} bytes is too large", bytes.len()))
        })?;

        let mut record = Vec::with_capacity(4 + bytes.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(bytes);

        self.stream.append(&record)
    }

    /// Read the record at `position`.
    pub fn read(&self, position: u64) -> Result<Vec<u8>> {
        let len = self.stream.read_i32_at(position)?;
        let len = usize::try_from(len).map_err(|_| {
            Error::Corrupted(format!("negative record length {} at {}", len, position))
        })?;

        self.stream.read_vec_at(position + 4, len)
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }
}
