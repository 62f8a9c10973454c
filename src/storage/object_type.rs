//! Kinds of stored objects.

use std::fmt;

/// Discriminates the streams a [`Storage`](super::Storage) hands out.
///
/// A `(parent, object, type)` triple names exactly one stream, so a table
/// named `Products` and a column named `Products` never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Table,
    Column,
    Store,
    Index,
}

impl ObjectType {
    pub const ALL: [ObjectType; 4] = [
        ObjectType::Table,
        ObjectType::Column,
        ObjectType::Store,
        ObjectType::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "Table",
            ObjectType::Column => "Column",
            ObjectType::Store => "Store",
            ObjectType::Index => "Index",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
