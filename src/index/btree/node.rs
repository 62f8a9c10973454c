//! B-tree node - the paging unit of an index tree.

use std::fmt;

use crate::common::config::{EMPTY_KEY_SLOT, KEY_SLOT_SIZE, POSITION_SLOT_SIZE};
use crate::common::position::{decode_position, encode_position};
use crate::common::{Error, Result, RowId};
use crate::storage::Stream;

/// Size of a node record: keys block position + children block position.
pub const NODE_RECORD_SIZE: usize = 2 * POSITION_SLOT_SIZE;

/// One node of a [`BPlusTree`](super::BPlusTree).
///
/// # On-Disk Layout
/// ```text
/// node record (16 bytes)        keys block                children block
/// ┌──────────────┬────────────┐ ┌──────┬──────┬─────┐    ┌──────┬──────┬─────┐
/// │ keys_pos i64 │ kids_pos i64│ │ i32  │ i32  │ ... │    │ i64  │ i64  │ ... │
/// └──────────────┴────────────┘ └──────┴──────┴─────┘    └──────┴──────┴─────┘
///                                 2·degree−1 slots          2·degree slots
/// ```
/// Unused slots hold `-1`. A block position of `-1` means the block was
/// never written.
///
/// # Lazy Loading
/// Opening a node reads only its 16-byte record. The keys block is read on
/// first access to the keys, the children block on first access to the
/// children (which includes [`is_leaf`](BTreeNode::is_leaf): a leaf is a
/// node with no children). Each block is read at most once per instance.
///
/// # Dirty Tracking
/// Every mutation marks the affected block dirty. [`flush`](BTreeNode::flush)
/// rewrites only dirty blocks, in place once they have a position, so
/// flushing an unchanged node writes nothing.
pub struct BTreeNode {
    stream: Stream,
    degree: usize,

    position: Option<u64>,
    keys_position: Option<u64>,
    children_position: Option<u64>,

    /// `None` until loaded.
    keys: Option<Vec<RowId>>,
    /// `None` until loaded.
    children: Option<Vec<BTreeNode>>,

    keys_dirty: bool,
    children_dirty: bool,
}

impl BTreeNode {
    /// Create an empty, not yet persisted node.
    pub fn new(stream: Stream, degree: usize) -> Self {
        Self {
            stream,
            degree,
            position: None,
            keys_position: None,
            children_position: None,
            keys: Some(Vec::new()),
            children: Some(Vec::new()),
            keys_dirty: true,
            children_dirty: true,
        }
    }

    /// Open the node whose record starts at `position`.
    pub fn open(stream: Stream, degree: usize, position: u64) -> Result<Self> {
        let mut cursor = stream.cursor(position);
        let keys_position = decode_position(cursor.read_i64()?)?;
        let children_position = decode_position(cursor.read_i64()?)?;

        Ok(Self {
            stream,
            degree,
            position: Some(position),
            keys_position,
            children_position,
            keys: None,
            children: None,
            keys_dirty: false,
            children_dirty: false,
        })
    }

    /// An empty node on the same stream with the same degree.
    pub fn new_sibling(&self) -> Self {
        Self::new(self.stream.clone(), self.degree)
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    pub fn max_children(&self) -> usize {
        2 * self.degree
    }

    // ========================================================================
    // Keys
    // ========================================================================

    pub fn keys(&mut self) -> Result<&[RowId]> {
        Ok(self.load_keys()?.as_slice())
    }

    pub fn key_count(&mut self) -> Result<usize> {
        Ok(self.load_keys()?.len())
    }

    pub fn key(&mut self, index: usize) -> Result<RowId> {
        let keys = self.load_keys()?;
        keys.get(index)
            .copied()
            .ok_or_else(|| slot_error("key", index, keys.len()))
    }

    pub fn set_key(&mut self, index: usize, key: RowId) -> Result<()> {
        let keys = self.load_keys()?;
        let len = keys.len();
        let slot = keys.get_mut(index).ok_or_else(|| slot_error("key", index, len))?;
        *slot = key;
        self.keys_dirty = true;
        Ok(())
    }

    pub fn insert_key(&mut self, index: usize, key: RowId) -> Result<()> {
        let keys = self.load_keys()?;
        if index > keys.len() {
            return Err(slot_error("key", index, keys.len()));
        }
        keys.insert(index, key);
        self.keys_dirty = true;
        Ok(())
    }

    pub fn push_key(&mut self, key: RowId) -> Result<()> {
        self.load_keys()?.push(key);
        self.keys_dirty = true;
        Ok(())
    }

    pub fn remove_key(&mut self, index: usize) -> Result<RowId> {
        let keys = self.load_keys()?;
        if index >= keys.len() {
            return Err(slot_error("key", index, keys.len()));
        }
        let key = keys.remove(index);
        self.keys_dirty = true;
        Ok(key)
    }

    pub fn pop_key(&mut self) -> Result<RowId> {
        let key = self
            .load_keys()?
            .pop()
            .ok_or_else(|| slot_error("key", 0, 0))?;
        self.keys_dirty = true;
        Ok(key)
    }

    /// Remove and return the keys from `at` onwards.
    pub fn split_off_keys(&mut self, at: usize) -> Result<Vec<RowId>> {
        let keys = self.load_keys()?;
        if at > keys.len() {
            return Err(slot_error("key", at, keys.len()));
        }
        let tail = keys.split_off(at);
        self.keys_dirty = true;
        Ok(tail)
    }

    pub fn extend_keys(&mut self, keys: Vec<RowId>) -> Result<()> {
        self.load_keys()?.extend(keys);
        self.keys_dirty = true;
        Ok(())
    }

    // ========================================================================
    // Children
    // ========================================================================

    pub fn is_leaf(&mut self) -> Result<bool> {
        Ok(self.load_children()?.is_empty())
    }

    pub fn child_count(&mut self) -> Result<usize> {
        Ok(self.load_children()?.len())
    }

    pub fn child_mut(&mut self, index: usize) -> Result<&mut BTreeNode> {
        let children = self.load_children()?;
        let len = children.len();
        children
            .get_mut(index)
            .ok_or_else(|| slot_error("child", index, len))
    }

    /// All children, for traversal. Does not mark the node dirty.
    pub fn children_mut(&mut self) -> Result<&mut [BTreeNode]> {
        Ok(self.load_children()?.as_mut_slice())
    }

    pub fn insert_child(&mut self, index: usize, node: BTreeNode) -> Result<()> {
        let children = self.load_children()?;
        if index > children.len() {
            return Err(slot_error("child", index, children.len()));
        }
        children.insert(index, node);
        self.children_dirty = true;
        Ok(())
    }

    pub fn push_child(&mut self, node: BTreeNode) -> Result<()> {
        self.load_children()?.push(node);
        self.children_dirty = true;
        Ok(())
    }

    pub fn remove_child(&mut self, index: usize) -> Result<BTreeNode> {
        let children = self.load_children()?;
        if index >= children.len() {
            return Err(slot_error("child", index, children.len()));
        }
        let node = children.remove(index);
        self.children_dirty = true;
        Ok(node)
    }

    pub fn pop_child(&mut self) -> Result<BTreeNode> {
        let node = self
            .load_children()?
            .pop()
            .ok_or_else(|| slot_error("child", 0, 0))?;
        self.children_dirty = true;
        Ok(node)
    }

    /// Remove and return the children from `at` onwards.
    pub fn split_off_children(&mut self, at: usize) -> Result<Vec<BTreeNode>> {
        let children = self.load_children()?;
        if at > children.len() {
            return Err(slot_error("child", at, children.len()));
        }
        let tail = children.split_off(at);
        self.children_dirty = true;
        Ok(tail)
    }

    pub fn extend_children(&mut self, nodes: Vec<BTreeNode>) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.load_children()?.extend(nodes);
        self.children_dirty = true;
        Ok(())
    }

    /// Consume the node, returning its keys and children.
    ///
    /// Used when a node is merged into its sibling; its own blocks become
    /// unreachable.
    pub fn into_parts(mut self) -> Result<(Vec<RowId>, Vec<BTreeNode>)> {
        self.load_keys()?;
        self.load_children()?;
        Ok((
            self.keys.take().unwrap_or_default(),
            self.children.take().unwrap_or_default(),
        ))
    }

    // ========================================================================
    // Fill state
    // ========================================================================

    pub fn has_reached_max_size(&mut self) -> Result<bool> {
        let max = self.max_keys();
        Ok(self.key_count()? == max)
    }

    pub fn has_reached_min_size(&mut self) -> Result<bool> {
        let min = self.degree - 1;
        Ok(self.key_count()? == min)
    }

    /// True if a key can be taken without dropping below the minimum.
    pub fn can_spare_key(&mut self) -> Result<bool> {
        let degree = self.degree;
        Ok(self.key_count()? >= degree)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write dirty state, children first, and return the record position.
    ///
    /// Blocks are appended the first time they are written and rewritten in
    /// place afterwards.
    pub fn flush(&mut self) -> Result<u64> {
        let child_positions = match self.children.as_mut() {
            Some(children) => Some(
                children
                    .iter_mut()
                    .map(BTreeNode::flush)
                    .collect::<Result<Vec<u64>>>()?,
            ),
            None => None,
        };

        let mut record_dirty = self.position.is_none();

        if self.keys_dirty {
            if let Some(keys) = &self.keys {
                let block = encode_keys_block(keys, self.max_keys())?;
                record_dirty |= write_block(&self.stream, &mut self.keys_position, &block)?;
            }
            self.keys_dirty = false;
        }

        if self.children_dirty {
            if let Some(positions) = &child_positions {
                let block = encode_children_block(positions, self.max_children())?;
                record_dirty |=
                    write_block(&self.stream, &mut self.children_position, &block)?;
            }
            self.children_dirty = false;
        }

        let mut record = Vec::with_capacity(NODE_RECORD_SIZE);
        record.extend_from_slice(&encode_position(self.keys_position).to_le_bytes());
        record.extend_from_slice(&encode_position(self.children_position).to_le_bytes());

        match self.position {
            None => {
                self.position = Some(self.stream.append(&record)?);
            }
            Some(position) if record_dirty => {
                self.stream.write_at(position, &record)?;
            }
            Some(_) => {}
        }

        self.position
            .ok_or_else(|| Error::StructuralInconsistency("node flushed without a position".into()))
    }

    // ========================================================================
    // Lazy loading
    // ========================================================================

    fn load_keys(&mut self) -> Result<&mut Vec<RowId>> {
        let keys = match self.keys.take() {
            Some(keys) => keys,
            None => self.read_keys()?,
        };
        Ok(self.keys.insert(keys))
    }

    fn load_children(&mut self) -> Result<&mut Vec<BTreeNode>> {
        let children = match self.children.take() {
            Some(children) => children,
            None => self.read_children()?,
        };
        Ok(self.children.insert(children))
    }

    fn read_keys(&self) -> Result<Vec<RowId>> {
        let Some(position) = self.keys_position else {
            return Ok(Vec::new());
        };

        let block = self
            .stream
            .read_vec_at(position, self.max_keys() * KEY_SLOT_SIZE)?;

        Ok(block
            .chunks_exact(KEY_SLOT_SIZE)
            .map(|slot| RowId::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
            .take_while(|key| key.is_valid())
            .collect())
    }

    fn read_children(&self) -> Result<Vec<BTreeNode>> {
        let Some(position) = self.children_position else {
            return Ok(Vec::new());
        };

        let block = self
            .stream
            .read_vec_at(position, self.max_children() * POSITION_SLOT_SIZE)?;

        let mut children = Vec::new();
        for slot in block.chunks_exact(POSITION_SLOT_SIZE) {
            let mut raw = [0u8; POSITION_SLOT_SIZE];
            raw.copy_from_slice(slot);
            match decode_position(i64::from_le_bytes(raw))? {
                Some(child) => {
                    children.push(BTreeNode::open(self.stream.clone(), self.degree, child)?)
                }
                None => break,
            }
        }
        Ok(children)
    }
}

impl fmt::Debug for BTreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTreeNode")
            .field("position", &self.position)
            .field("keys", &self.keys)
            .field("children", &self.children.as_ref().map(Vec::len))
            .finish()
    }
}

/// Write `block` at `*position`, allocating it at the end of the stream on
/// first write. Returns true if a new position was allocated.
fn write_block(stream: &Stream, position: &mut Option<u64>, block: &[u8]) -> Result<bool> {
    match *position {
        Some(existing) => {
            stream.write_at(existing, block)?;
            Ok(false)
        }
        None => {
            *position = Some(stream.append(block)?);
            Ok(true)
        }
    }
}

fn encode_keys_block(keys: &[RowId], slots: usize) -> Result<Vec<u8>> {
    if keys.len() > slots {
        return Err(Error::StructuralInconsistency(format!(
            "node holds {} keys but has {} slots",
            keys.len(),
            slots
        )));
    }

    let mut block = Vec::with_capacity(slots * KEY_SLOT_SIZE);
    for key in keys {
        block.extend_from_slice(&key.to_le_bytes());
    }
    for _ in keys.len()..slots {
        block.extend_from_slice(&EMPTY_KEY_SLOT.to_le_bytes());
    }
    Ok(block)
}

fn encode_children_block(positions: &[u64], slots: usize) -> Result<Vec<u8>> {
    if positions.len() > slots {
        return Err(Error::StructuralInconsistency(format!(
            "node holds {} children but has {} slots",
            positions.len(),
            slots
        )));
    }

    let mut block = Vec::with_capacity(slots * POSITION_SLOT_SIZE);
    for position in positions {
        block.extend_from_slice(&encode_position(Some(*position)).to_le_bytes());
    }
    for _ in positions.len()..slots {
        block.extend_from_slice(&encode_position(None).to_le_bytes());
    }
    Ok(block)
}

fn slot_error(what: &str, index: usize, len: usize) -> Error {
    Error::StructuralInconsistency(format!(
        "{} slot {} out of bounds for node with {}",
        what, index, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[u32]) -> Vec<RowId> {
        ids.iter().copied().map(RowId::new).collect()
    }

    #[test]
    fn test_new_node_is_empty_leaf() {
        let mut node = BTreeNode::new(Stream::in_memory(), 3);
        assert!(node.is_leaf().unwrap());
        assert_eq!(node.key_count().unwrap(), 0);
        assert_eq!(node.position(), None);
        assert_eq!(node.max_keys(), 5);
        assert_eq!(node.max_children(), 6);
    }

    #[test]
    fn test_fill_state() {
        let mut node = BTreeNode::new(Stream::in_memory(), 2);
        node.push_key(RowId::new(0)).unwrap();
        assert!(node.has_reached_min_size().unwrap());
        assert!(!node.can_spare_key().unwrap());

        node.extend_keys(rows(&[1, 2])).unwrap();
        assert!(node.has_reached_max_size().unwrap());
        assert!(node.can_spare_key().unwrap());
    }

    #[test]
    fn test_key_mutations() {
        let mut node = BTreeNode::new(Stream::in_memory(), 3);
        node.extend_keys(rows(&[1, 3])).unwrap();
        node.insert_key(1, RowId::new(2)).unwrap();
        node.insert_key(0, RowId::new(0)).unwrap();
        assert_eq!(node.keys().unwrap(), rows(&[0, 1, 2, 3]).as_slice());

        assert_eq!(node.remove_key(1).unwrap(), RowId::new(1));
        assert_eq!(node.pop_key().unwrap(), RowId::new(3));
        node.set_key(0, RowId::new(9)).unwrap();
        assert_eq!(node.keys().unwrap(), rows(&[9, 2]).as_slice());

        assert_eq!(node.split_off_keys(1).unwrap(), rows(&[2]));
        assert!(node.insert_key(5, RowId::new(1)).is_err());
        assert!(node.key(3).is_err());
    }

    #[test]
    fn test_flush_and_reopen_round_trip() {
        let stream = Stream::in_memory();

        let position = {
            let mut root = BTreeNode::new(stream.clone(), 2);
            root.push_key(RowId::new(10)).unwrap();

            let mut left = root.new_sibling();
            left.extend_keys(rows(&[1, 2, 3])).unwrap();
            let mut right = root.new_sibling();
            right.push_key(RowId::new(20)).unwrap();

            root.push_child(left).unwrap();
            root.push_child(right).unwrap();
            root.flush().unwrap()
        };

        let mut root = BTreeNode::open(stream, 2, position).unwrap();
        assert_eq!(root.keys().unwrap(), rows(&[10]).as_slice());
        assert!(!root.is_leaf().unwrap());
        assert_eq!(root.child_count().unwrap(), 2);
        assert_eq!(
            root.child_mut(0).unwrap().keys().unwrap(),
            rows(&[1, 2, 3]).as_slice()
        );
        assert!(root.child_mut(1).unwrap().is_leaf().unwrap());
    }

    #[test]
    fn test_block_sizes_on_disk() {
        let stream = Stream::in_memory();
        let mut node = BTreeNode::new(stream.clone(), 3);
        node.push_key(RowId::new(4)).unwrap();
        node.flush().unwrap();

        // keys block (5 × 4) + children block (6 × 8) + record (16)
        assert_eq!(stream.len().unwrap(), 20 + 48 + 16);

        // Unused key slots are -1.
        assert_eq!(stream.read_i32_at(0).unwrap(), 4);
        assert_eq!(stream.read_i32_at(4).unwrap(), -1);
        assert_eq!(stream.read_i64_at(20).unwrap(), -1);
    }

    #[test]
    fn test_flush_twice_writes_nothing_new() {
        let stream = Stream::in_memory();
        let mut node = BTreeNode::new(stream.clone(), 2);
        node.extend_keys(rows(&[5, 6])).unwrap();
        let first_pos = node.flush().unwrap();
        let bytes = stream.read_vec_at(0, stream.len().unwrap() as usize).unwrap();

        let second_pos = node.flush().unwrap();
        let again = stream.read_vec_at(0, stream.len().unwrap() as usize).unwrap();

        assert_eq!(first_pos, second_pos);
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_rewrite_in_place_after_mutation() {
        let stream = Stream::in_memory();
        let mut node = BTreeNode::new(stream.clone(), 2);
        node.push_key(RowId::new(1)).unwrap();
        let position = node.flush().unwrap();
        let len = stream.len().unwrap();

        node.push_key(RowId::new(2)).unwrap();
        node.flush().unwrap();
        assert_eq!(stream.len().unwrap(), len);

        let mut reopened = BTreeNode::open(stream, 2, position).unwrap();
        assert_eq!(reopened.keys().unwrap(), rows(&[1, 2]).as_slice());
    }

    #[test]
    fn test_overfull_node_refuses_flush() {
        let mut node = BTreeNode::new(Stream::in_memory(), 2);
        node.extend_keys(rows(&[1, 2, 3, 4])).unwrap();
        assert!(matches!(
            node.flush(),
            Err(Error::StructuralInconsistency(_))
        ));
    }

    #[test]
    fn test_into_parts() {
        let mut node = BTreeNode::new(Stream::in_memory(), 2);
        node.push_key(RowId::new(1)).unwrap();
        let child = node.new_sibling();
        node.push_child(child).unwrap();

        let (keys, children) = node.into_parts().unwrap();
        assert_eq!(keys, rows(&[1]));
        assert_eq!(children.len(), 1);
    }
}
