//! columndb - An embedded columnar table store with disk-resident B+Tree
//! secondary indices.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            columndb                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Table Layer (table/)                     │   │
//! │  │      Table + Row/RowMut + Searcher (query planning)      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                    ↓                         ↓                  │
//! │  ┌───────────────────────────┐  ┌──────────────────────────┐   │
//! │  │   Index Layer (index/)    │  │     Columns (table/)     │   │
//! │  │ Index + BPlusTree + Node  │→ │  offset slots per row    │   │
//! │  │ Comparator reads columns  │  │  Value ↔ bytes via codec │   │
//! │  └───────────────────────────┘  └──────────────────────────┘   │
//! │                    ↓                         ↓                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage Layer (storage/)                    │   │
//! │  │   Storage trait → Stream per (parent, object, type)      │   │
//! │  │   FileStorage | MemoryStorage      BlobStore heaps       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (RowId, Error, config)
//! - [`storage`] - Byte streams, storage providers, blob heaps
//! - [`value`] - Cell values and the codec that encodes them
//! - [`index`] - Comparator, B+Tree, and named indices
//! - [`table`] - Columns, tables, rows, and search
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use columndb::{BincodeCodec, FileStorage, IndexOptions, Table, Value};
//!
//! let storage = Arc::new(FileStorage::open_dir("my_data").unwrap());
//! let mut table =
//!     Table::create_with_columns(storage, "Products", &["ID", "Name"], Arc::new(BincodeCodec))
//!         .unwrap();
//! table.create_index("IX_ID", &["ID"], IndexOptions::unique()).unwrap();
//!
//! let row = [("ID".to_string(), Value::Int(1)), ("Name".to_string(), Value::from("a"))];
//! table.insert(&row.into_iter().collect()).unwrap();
//!
//! let conditions = [("ID".to_string(), Value::Int(1))].into_iter().collect();
//! let found = table.search(&conditions).unwrap();
//! assert_eq!(found[0].get("Name").unwrap(), Value::from("a"));
//! ```

pub mod common;
pub mod index;
pub mod storage;
pub mod table;
pub mod value;

// Re-export commonly used items at crate root for convenience
pub use common::config::{IndexOptions, SortOrder, StorageConfig, Uniqueness};
pub use common::{Error, Result, RowId};

pub use storage::{FileStorage, MemoryStorage, ObjectType, Storage};
pub use table::{Conditions, Row, RowMut, RowValues, Table};
pub use value::{BincodeCodec, Value, ValueCodec};
