//! Configuration constants and option types for columndb.

use std::path::PathBuf;

use crate::common::{Error, Result};

/// Default minimum degree of an index B+Tree.
///
/// A node holds at most `2 * degree - 1` keys, so with 2000 a node stores
/// up to 3999 row ordinals (about 16KB of key slots).
pub const DEFAULT_BTREE_DEGREE: u32 = 2000;

/// Smallest degree for which the B-tree fill invariants are satisfiable.
pub const MIN_BTREE_DEGREE: u32 = 2;

/// Width of a row-ordinal key slot on disk.
pub const KEY_SLOT_SIZE: usize = 4;

/// Width of a stream position slot on disk.
pub const POSITION_SLOT_SIZE: usize = 8;

/// On-disk marker for an absent stream position.
pub const NULL_POSITION: i64 = -1;

/// On-disk marker for an empty key slot (`-1` as a signed 32-bit value).
pub const EMPTY_KEY_SLOT: u32 = u32::MAX;

/// Check a B-tree degree against [`MIN_BTREE_DEGREE`].
pub fn validate_degree(degree: u32) -> Result<()> {
    if degree < MIN_BTREE_DEGREE {
        return Err(Error::Configuration(format!(
            "B-tree degree must be at least {}, got {}",
            MIN_BTREE_DEGREE, degree
        )));
    }
    Ok(())
}

/// Sort direction of an index.
#[repr(i32)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending = 0,
    Descending = 1,
}

impl SortOrder {
    /// Convert from the on-disk discriminator.
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SortOrder::Ascending),
            1 => Ok(SortOrder::Descending),
            other => Err(Error::Corrupted(format!("unknown sort order {}", other))),
        }
    }
}

/// Whether an index accepts several rows with equal covered-column values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Uniqueness {
    Unique,
    #[default]
    AllowDuplicates,
}

/// Options for [`Table::create_index`](crate::Table::create_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub sort_order: SortOrder,
    pub uniqueness: Uniqueness,
    pub degree: u32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::Ascending,
            uniqueness: Uniqueness::AllowDuplicates,
            degree: DEFAULT_BTREE_DEGREE,
        }
    }
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self {
            uniqueness: Uniqueness::Unique,
            ..Self::default()
        }
    }

    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    pub fn uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = uniqueness;
        self
    }

    pub fn degree(mut self, degree: u32) -> Self {
        self.degree = degree;
        self
    }
}

/// Configuration for [`FileStorage`](crate::storage::FileStorage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one `.dat` file per stored object.
    pub data_dir: PathBuf,

    /// Flush every open stream on its own worker thread.
    pub parallel_flush: bool,

    /// Call `fsync` on each file during flush.
    pub sync_on_flush: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./columndb_data"),
            parallel_flush: false,
            sync_on_flush: true,
        }
    }
}

impl StorageConfig {
    /// Create a new config builder
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder::default()
    }
}

/// Builder for StorageConfig
#[derive(Default)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn parallel_flush(mut self, enabled: bool) -> Self {
        self.config.parallel_flush = enabled;
        self
    }

    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.config.sync_on_flush = enabled;
        self
    }

    pub fn build(self) -> StorageConfig {
        self.config
    }
}
