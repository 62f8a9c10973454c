//! In-memory storage for tests and throwaway tables.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::storage::{stream_key, ObjectType, Storage, Stream, StreamKey};

/// Keeps every object in an in-memory buffer.
///
/// Streams live as long as the storage does; reopening a table from the
/// same `MemoryStorage` sees everything written so far.
#[derive(Default)]
pub struct MemoryStorage {
    streams: Mutex<HashMap<StreamKey, Stream>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects created so far.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Storage for MemoryStorage {
    fn open(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream> {
        self.streams
            .lock()
            .get(&stream_key(object, parent, kind))
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                kind,
                name: object.to_string(),
            })
    }

    fn create(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream> {
        let key = stream_key(object, parent, kind);
        let mut streams = self.streams.lock();

        if streams.contains_key(&key) {
            return Err(Error::ObjectExists {
                kind,
                name: object.to_string(),
            });
        }

        let stream = Stream::in_memory();
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    fn flush(&self) -> Result<()> {
        for stream in self.streams.lock().values() {
            stream.flush(false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_open() {
        let storage = MemoryStorage::new();
        let created = storage.create("IX_ID", "Products", ObjectType::Index).unwrap();
        created.append(b"tree").unwrap();

        let opened = storage.open("IX_ID", "Products", ObjectType::Index).unwrap();
        assert_eq!(opened.read_vec_at(0, 4).unwrap(), b"tree");
    }

    #[test]
    fn test_create_existing_fails() {
        let storage = MemoryStorage::new();
        storage.create("Products", "", ObjectType::Table).unwrap();
        assert!(matches!(
            storage.create("Products", "", ObjectType::Table),
            Err(Error::ObjectExists { .. })
        ));
    }

    #[test]
    fn test_open_missing_fails() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.open("Products", "", ObjectType::Table),
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_underscored_names_do_not_collide() {
        let storage = MemoryStorage::new();
        let first = storage.create("A_B", "T", ObjectType::Column).unwrap();
        let second = storage.create("B", "T_A", ObjectType::Column).unwrap();
        assert!(!first.same_stream(&second));
        assert!(storage
            .open("A_B", "T", ObjectType::Column)
            .unwrap()
            .same_stream(&first));
        assert_eq!(storage.stream_count(), 2);
    }

    #[test]
    fn test_flush_is_noop() {
        let storage = MemoryStorage::new();
        storage.create("a", "", ObjectType::Table).unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.stream_count(), 1);
    }
}
