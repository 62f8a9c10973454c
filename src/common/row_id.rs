//! Row identifier type.

use std::fmt;

/// Zero-based row ordinal within a table.
///
/// Every column stores exactly one cell per ordinal and every index tree
/// uses ordinals as its keys. On disk an ordinal is a 32-bit slot where
/// `-1` ([`RowId::INVALID`]) marks an empty slot.
///
/// # Example
/// ```
/// use columndb::RowId;
///
/// let row = RowId::new(42);
/// assert!(row.is_valid());
/// assert_eq!(row.0, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub u32);

impl RowId {
    /// Empty-slot sentinel.
    pub const INVALID: RowId = RowId(u32::MAX);

    #[inline]
    pub fn new(id: u32) -> Self {
        RowId(id)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Use as a `Vec` index.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        RowId(u32::from_le_bytes(bytes))
    }
}

impl From<u32> for RowId {
    fn from(id: u32) -> Self {
        RowId(id)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Row(INVALID)")
        } else {
            write!(f, "Row({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_new() {
        let rid = RowId::new(42);
        assert_eq!(rid.0, 42);
        assert!(rid.is_valid());
        assert_eq!(rid.as_usize(), 42);
    }

    #[test]
    fn test_row_id_invalid_matches_disk_sentinel() {
        assert!(!RowId::INVALID.is_valid());
        assert_eq!(RowId::INVALID.to_le_bytes(), (-1i32).to_le_bytes());
    }

    #[test]
    fn test_row_id_bytes() {
        let rid = RowId::new(0x0102_0304);
        assert_eq!(RowId::from_le_bytes(rid.to_le_bytes()), rid);
    }

    #[test]
    fn test_row_id_display() {
        assert_eq!(format!("{}", RowId::new(7)), "Row(7)");
        assert_eq!(format!("{}", RowId::INVALID), "Row(INVALID)");
    }
}
