//! File Storage - one file per stored object.
//!
//! The [`FileStorage`] maps every `(parent, object, type)` triple to a
//! `.dat` file inside the configured data directory.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::common::config::StorageConfig;
use crate::common::{Error, Result};
use crate::storage::{stream_key, ObjectType, Storage, Stream, StreamKey};

/// Stores each object in its own file.
///
/// # File Naming
/// ```text
/// {data_dir}/
///   ├── {h(Products)}_Table.dat           (table "Products", no parent)
///   ├── {h(Products)}_{h(ID)}_Column.dat  (column "ID" of "Products")
///   ├── {h(Products)}_{h(ID)}_Store.dat   (blob heap of column "ID")
///   └── {h(Products)}_{h(IX_ID)}_Index.dat (index "IX_ID" of "Products")
/// ```
/// `h` is the first 128 bits of SHA-256 as 32 hex digits, so arbitrary
/// object names map to portable, fixed-width file names.
///
/// # Flushing
/// [`flush`](Storage::flush) visits every stream opened or created through
/// this storage. With `parallel_flush` each stream gets its own scoped
/// worker thread; the call returns only after every worker has joined.
pub struct FileStorage {
    config: StorageConfig,
    /// Streams handed out so far, keyed by [`stream_key`].
    streams: Mutex<HashMap<StreamKey, Stream>>,
}

impl FileStorage {
    /// Create a storage rooted at `config.data_dir`, creating the directory
    /// if needed.
    pub fn new(config: StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        tracing::debug!(data_dir = %config.data_dir.display(), "file storage opened");

        Ok(Self {
            config,
            streams: Mutex::new(HashMap::new()),
        })
    }

    /// Shorthand for a storage with default options in `path`.
    pub fn open_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(
            StorageConfig::builder()
                .data_dir(path.as_ref())
                .build(),
        )
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Path of the file backing an object.
    pub fn file_path(&self, object: &str, parent: &str, kind: ObjectType) -> PathBuf {
        let parts: Vec<String> = [name_hash(parent), name_hash(object)]
            .into_iter()
            .filter(|part| !part.is_empty())
            .chain(std::iter::once(kind.to_string()))
            .collect();

        self.config.data_dir.join(format!("{}.dat", parts.join("_")))
    }

    /// Number of streams currently registered.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Storage for FileStorage {
    fn open(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream> {
        let key = stream_key(object, parent, kind);
        let mut streams = self.streams.lock();

        if let Some(stream) = streams.get(&key) {
            return Ok(stream.clone());
        }

        let path = self.file_path(object, parent, kind);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::ObjectNotFound {
                    kind,
                    name: object.to_string(),
                },
                _ => Error::Io(e),
            })?;

        let stream = Stream::new(file);
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    fn create(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream> {
        let key = stream_key(object, parent, kind);
        let mut streams = self.streams.lock();

        let exists = Error::ObjectExists {
            kind,
            name: object.to_string(),
        };
        if streams.contains_key(&key) {
            return Err(exists);
        }

        let path = self.file_path(object, parent, kind);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => exists,
                _ => Error::Io(e),
            })?;

        let stream = Stream::new(file);
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    fn flush(&self) -> Result<()> {
        // Snapshot the handles so no registry lock is held during I/O.
        let streams: Vec<Stream> = self.streams.lock().values().cloned().collect();
        let durable = self.config.sync_on_flush;

        tracing::debug!(
            streams = streams.len(),
            parallel = self.config.parallel_flush,
            "flushing file storage"
        );

        if !self.config.parallel_flush {
            for stream in &streams {
                stream.flush(durable)?;
            }
            return Ok(());
        }

        thread::scope(|scope| {
            let workers: Vec<_> = streams
                .iter()
                .map(|stream| scope.spawn(move || stream.flush(durable)))
                .collect();

            // Join every worker before reporting the first failure.
            let mut first_error = None;
            for worker in workers {
                let outcome = worker.join().unwrap_or_else(|_| {
                    Err(Error::Io(io::Error::new(
                        io::ErrorKind::Other,
                        "flush worker panicked",
                    )))
                });
                if let Err(e) = outcome {
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

/// Width of a hashed name component, in bytes of digest.
const NAME_HASH_BYTES: usize = 16;

/// Hex of the leading 128 bits of a name's SHA-256; blank names hash to the
/// empty string.
fn name_hash(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }

    let digest = Sha256::digest(name.as_bytes());
    digest[..NAME_HASH_BYTES]
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_in(dir: &Path, parallel: bool) -> FileStorage {
        FileStorage::new(
            StorageConfig::builder()
                .data_dir(dir)
                .parallel_flush(parallel)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_new_object() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        let stream = storage.create("ID", "Products", ObjectType::Column).unwrap();
        assert_eq!(stream.len().unwrap(), 0);
        assert!(storage
            .file_path("ID", "Products", ObjectType::Column)
            .exists());
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        storage.create("ID", "Products", ObjectType::Column).unwrap();
        let err = storage
            .create("ID", "Products", ObjectType::Column)
            .unwrap_err();
        assert!(matches!(err, Error::ObjectExists { .. }));

        // Also rejected by a second storage over the same directory.
        let other = storage_in(dir.path(), false);
        assert!(other.create("ID", "Products", ObjectType::Column).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        let err = storage.open("Missing", "", ObjectType::Table).unwrap_err();
        assert!(matches!(
            err,
            Error::ObjectNotFound {
                kind: ObjectType::Table,
                ..
            }
        ));
    }

    #[test]
    fn test_open_returns_shared_handle() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        let created = storage.create("Products", "", ObjectType::Table).unwrap();
        let opened = storage.open("Products", "", ObjectType::Table).unwrap();
        assert!(created.same_stream(&opened));
        assert_eq!(storage.stream_count(), 1);
    }

    #[test]
    fn test_object_types_do_not_collide() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        storage.create("Name", "Products", ObjectType::Column).unwrap();
        storage.create("Name", "Products", ObjectType::Store).unwrap();
        storage.create("Name", "Products", ObjectType::Index).unwrap();
        assert_eq!(storage.stream_count(), 3);
    }

    #[test]
    fn test_file_names_skip_blank_parent() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        let path = storage.file_path("Products", "", ObjectType::Table);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_Table.dat"));
        assert_eq!(name.matches('_').count(), 1);
    }

    #[test]
    fn test_underscored_names_get_distinct_streams() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);

        let first = storage.create("A_B", "T", ObjectType::Column).unwrap();
        let second = storage.create("B", "T_A", ObjectType::Column).unwrap();
        assert!(!first.same_stream(&second));
        first.append(b"first").unwrap();

        let reopened = storage.open("B", "T_A", ObjectType::Column).unwrap();
        assert!(reopened.same_stream(&second));
        assert_eq!(reopened.len().unwrap(), 0);
    }

    #[test]
    fn test_crc_colliding_names_get_distinct_files() {
        // "plumless" and "buckeroo" share a CRC32.
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path(), false);
        assert_ne!(
            storage.file_path("plumless", "T", ObjectType::Column),
            storage.file_path("buckeroo", "T", ObjectType::Column)
        );

        storage.create("plumless", "T", ObjectType::Column).unwrap();
        storage.create("buckeroo", "T", ObjectType::Column).unwrap();
        assert_eq!(storage.stream_count(), 2);
    }

    #[test]
    fn test_name_hash_width() {
        assert_eq!(name_hash("Products").len(), NAME_HASH_BYTES * 2);
        assert!(name_hash("Products").chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name_hash("   "), "");
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();

        // Create and write
        {
            let storage = storage_in(dir.path(), false);
            let stream = storage.create("Products", "", ObjectType::Table).unwrap();
            stream.append(&0x42i32.to_le_bytes()).unwrap();
            storage.flush().unwrap();
        }

        // Reopen and verify
        {
            let storage = storage_in(dir.path(), false);
            let stream = storage.open("Products", "", ObjectType::Table).unwrap();
            assert_eq!(stream.read_i32_at(0).unwrap(), 0x42);
        }
    }

    #[test]
    fn test_parallel_flush_writes_every_stream() {
        let dir = tempdir().unwrap();
        {
            let storage = storage_in(dir.path(), true);
            for i in 0..8 {
                let stream = storage
                    .create(&format!("col{}", i), "T", ObjectType::Column)
                    .unwrap();
                stream.append(&(i as i32).to_le_bytes()).unwrap();
            }
            storage.flush().unwrap();
        }

        let storage = storage_in(dir.path(), false);
        for i in 0..8 {
            let stream = storage
                .open(&format!("col{}", i), "T", ObjectType::Column)
                .unwrap();
            assert_eq!(stream.read_i32_at(0).unwrap(), i);
        }
    }
}
