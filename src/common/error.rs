//! Error types for columndb.

use thiserror::Error;

use crate::storage::ObjectType;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in columndb.
///
/// Every error is fail-fast: the engine never retries, it reports the
/// failure to the caller at the point of detection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a backing stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row or column index beyond the current count.
    #[error("index {index} out of range (count {count})")]
    OutOfRange { index: u64, count: u64 },

    /// A unique index already holds an entry with the same column values.
    #[error("duplicate key for row {row}")]
    DuplicateKey { row: u32 },

    /// Two structures that must agree do not (e.g. column cell counts).
    #[error("structural inconsistency: {0}")]
    StructuralInconsistency(String),

    /// A search condition cannot be mapped to any column or index.
    #[error("unresolvable condition: {0}")]
    UnresolvableCondition(String),

    /// Invalid configuration value (e.g. B-tree degree below 2).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `create` was called for an object that already exists.
    #[error("{kind} '{name}' already exists")]
    ObjectExists { kind: ObjectType, name: String },

    /// `open` was called for an object that does not exist.
    #[error("{kind} '{name}' not found")]
    ObjectNotFound { kind: ObjectType, name: String },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    /// A column cannot be dropped while an index covers it.
    #[error("column '{column}' is used by index '{index}'")]
    ColumnInUse { column: String, index: String },

    /// Cell value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Bytes read from a stream do not form a valid record.
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
