//! Storage layer - byte streams, the stream provider, and the blob heap.
//!
//! This module handles persistent storage:
//! - [`Stream`] - Positional byte stream shared by the owners of one object
//! - [`Storage`] - Opens/creates one stream per `(parent, object, type)`
//! - [`FileStorage`] / [`MemoryStorage`] - File-backed and in-memory providers
//! - [`BlobStore`] - Append-only heap of length-prefixed records

mod blob_store;
mod file_storage;
mod memory_storage;
mod object_type;
pub mod stream;

pub use blob_store::BlobStore;
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use object_type::ObjectType;
pub use stream::{Stream, StreamBackend};

use crate::common::Result;

/// Provider of named byte streams.
///
/// The engine never looks past this trait at the concrete medium.
/// Implementations hand out the same [`Stream`] handle when one object is
/// opened twice, and keep every stream they handed out so that
/// [`flush`](Storage::flush) can reach it.
pub trait Storage: Send + Sync {
    /// Open the stream of an existing object.
    ///
    /// # Errors
    /// `Error::ObjectNotFound` if the object was never created.
    fn open(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream>;

    /// Create the stream of a new, empty object.
    ///
    /// # Errors
    /// `Error::ObjectExists` if the object already exists.
    fn create(&self, object: &str, parent: &str, kind: ObjectType) -> Result<Stream>;

    /// Push every stream handed out so far to the medium.
    ///
    /// Returns only after all streams have been flushed.
    fn flush(&self) -> Result<()>;
}

/// Registry key for a stream: `(parent, object, type)`.
pub(crate) type StreamKey = (String, String, ObjectType);

pub(crate) fn stream_key(object: &str, parent: &str, kind: ObjectType) -> StreamKey {
    (parent.to_string(), object.to_string(), kind)
}
