//! B+Tree - disk-resident ordering of row ordinals.

use std::cmp::Ordering;

use tracing::trace;

use super::node::BTreeNode;
use crate::common::config::validate_degree;
use crate::common::position::{decode_position, encode_position};
use crate::common::{Error, Result, RowId};
use crate::index::comparator::{Comparator, EncodedKey};
use crate::storage::Stream;

/// Size of the tree header: degree + height + duplicates flag + root position.
pub const TREE_HEADER_SIZE: usize = 4 + 4 + 1 + 8;

/// Balanced search tree over row ordinals.
///
/// Keys are row ordinals; their order comes from a [`Comparator`] passed to
/// every operation, which reads the covered column cells on demand. The
/// tree itself never sees column values.
///
/// # Header Layout
/// ```text
/// ┌─────────────┬─────────────┬────────────────┬────────────────┐
/// │ degree (i32)│ height (i32)│ duplicates (u8)│ root_pos (i64) │
/// └─────────────┴─────────────┴────────────────┴────────────────┘
/// ```
/// The header is appended on the first [`flush`](BPlusTree::flush) and
/// rewritten in place afterwards.
///
/// # Invariants
/// - Every node holds at most `2·degree − 1` keys.
/// - Every non-root node holds at least `degree − 1` keys.
/// - An internal node with `k` keys has `k + 1` children.
/// - All leaves sit at depth `height`.
/// - Keys are ordered by [`Comparator::compare_keys`] across the whole tree.
pub struct BPlusTree {
    stream: Stream,
    position: Option<u64>,
    degree: u32,
    height: u32,
    duplicates: bool,
    root: BTreeNode,
}

impl BPlusTree {
    /// Create an empty tree on `stream`. Nothing is written until
    /// [`flush`](BPlusTree::flush).
    ///
    /// # Errors
    /// `Error::Configuration` if `degree` is below 2.
    pub fn new(stream: Stream, degree: u32, duplicates: bool) -> Result<Self> {
        validate_degree(degree)?;
        let root = BTreeNode::new(stream.clone(), degree as usize);

        Ok(Self {
            stream,
            position: None,
            degree,
            height: 1,
            duplicates,
            root,
        })
    }

    /// Open the tree whose header starts at `position`.
    pub fn open(stream: Stream, position: u64) -> Result<Self> {
        let mut cursor = stream.cursor(position);
        let degree = cursor.read_i32()?;
        let height = cursor.read_i32()?;
        let duplicates = cursor.read_bool()?;
        let root_position = decode_position(cursor.read_i64()?)?;

        let degree = u32::try_from(degree)
            .map_err(|_| Error::Corrupted(format!("negative tree degree {}", degree)))?;
        validate_degree(degree)?;
        let height = u32::try_from(height)
            .ok()
            .filter(|h| *h >= 1)
            .ok_or_else(|| Error::Corrupted(format!("invalid tree height {}", height)))?;

        let root = match root_position {
            Some(root) => BTreeNode::open(stream.clone(), degree as usize, root)?,
            None => BTreeNode::new(stream.clone(), degree as usize),
        };

        Ok(Self {
            stream,
            position: Some(position),
            degree,
            height,
            duplicates,
            root,
        })
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Number of levels; a tree with only a root has height 1.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn allows_duplicates(&self) -> bool {
        self.duplicates
    }

    /// Header position, once flushed.
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Every ordinal whose covered values equal `key`.
    ///
    /// Within each node, keys `[lower, upper)` match and children
    /// `lower..=upper` may hold more matches, so runs of equal keys spanning
    /// several subtrees are found. Nodes are visited with an explicit stack.
    pub fn search(&mut self, cmp: &Comparator<'_>, key: &EncodedKey) -> Result<Vec<RowId>> {
        let mut found = Vec::new();
        let mut stack: Vec<&mut BTreeNode> = vec![&mut self.root];

        while let Some(node) = stack.pop() {
            let (lower, upper) = {
                let keys = node.keys()?;
                let lower = partition_point(keys.len(), |i| {
                    Ok(cmp.compare_encoded(key, keys[i])? == Ordering::Greater)
                })?;
                let upper = lower
                    + partition_point(keys.len() - lower, |i| {
                        Ok(cmp.compare_encoded(key, keys[lower + i])? != Ordering::Less)
                    })?;
                found.extend_from_slice(&keys[lower..upper]);
                (lower, upper)
            };

            if !node.is_leaf()? {
                let children = node.children_mut()?;
                for child in children[lower..=upper].iter_mut() {
                    stack.push(child);
                }
            }
        }

        Ok(found)
    }

    /// Every ordinal whose values equal `key` on the columns `key` covers,
    /// found by visiting every node.
    ///
    /// Used when the key covers only part of the bound columns and the
    /// tree order cannot narrow the search.
    pub fn full_scan(&mut self, cmp: &Comparator<'_>, key: &EncodedKey) -> Result<Vec<RowId>> {
        let mut found = Vec::new();
        for row in self.keys()? {
            if cmp.compare_encoded(key, row)? == Ordering::Equal {
                found.push(row);
            }
        }
        Ok(found)
    }

    /// Every key in tree order.
    pub fn keys(&mut self) -> Result<Vec<RowId>> {
        let mut out = Vec::new();
        collect_in_order(&mut self.root, &mut out)?;
        Ok(out)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.root.key_count()? == 0)
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert `key`.
    ///
    /// # Errors
    /// `Error::DuplicateKey` if the tree does not allow duplicates and a key
    /// with equal values is already present. The tree may have been split on
    /// the way down but still holds every previous key.
    pub fn insert(&mut self, cmp: &Comparator<'_>, key: RowId) -> Result<()> {
        let degree = self.degree as usize;

        if self.root.has_reached_max_size()? {
            let new_root = self.root.new_sibling();
            let old_root = std::mem::replace(&mut self.root, new_root);
            self.root.push_child(old_root)?;
            split_child(&mut self.root, 0, degree)?;
            self.height += 1;
            trace!(height = self.height, "root split");
        }

        insert_non_full(&mut self.root, cmp, key, self.duplicates, degree)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove `key`. Returns false if it was not present.
    ///
    /// Descends once from the root, topping up every child it enters so
    /// that a key can always be removed without walking back up.
    pub fn delete(&mut self, cmp: &Comparator<'_>, key: RowId) -> Result<bool> {
        let degree = self.degree as usize;
        let removed = delete_from(&mut self.root, cmp, key, degree)?;

        if self.root.key_count()? == 0 && !self.root.is_leaf()? {
            let child_count = self.root.child_count()?;
            if child_count != 1 {
                return Err(Error::StructuralInconsistency(format!(
                    "empty root has {} children",
                    child_count
                )));
            }
            self.root = self.root.remove_child(0)?;
            self.height -= 1;
            trace!(height = self.height, "root collapsed");
        }

        Ok(removed)
    }

    /// Drop every key. The old nodes stay in the stream, unreachable.
    pub fn clear(&mut self) {
        self.root = BTreeNode::new(self.stream.clone(), self.degree as usize);
        self.height = 1;
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Flush every loaded node, then the header. Returns the header position.
    pub fn flush(&mut self) -> Result<u64> {
        let root_position = self.root.flush()?;

        let mut header = Vec::with_capacity(TREE_HEADER_SIZE);
        header.extend_from_slice(&(self.degree as i32).to_le_bytes());
        header.extend_from_slice(&(self.height as i32).to_le_bytes());
        header.push(self.duplicates as u8);
        header.extend_from_slice(&encode_position(Some(root_position)).to_le_bytes());

        let position = match self.position {
            Some(position) => {
                self.stream.write_at(position, &header)?;
                position
            }
            None => {
                let position = self.stream.append(&header)?;
                self.position = Some(position);
                position
            }
        };

        Ok(position)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check every structural invariant of the tree.
    ///
    /// # Errors
    /// `Error::StructuralInconsistency` describing the first violation.
    pub fn validate(&mut self, cmp: &Comparator<'_>) -> Result<()> {
        let mut check = Validation {
            cmp,
            degree: self.degree as usize,
            height: self.height as usize,
        };
        check.node(&mut self.root, 1, true, None, None)
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("position", &self.position)
            .field("degree", &self.degree)
            .field("height", &self.height)
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

// ============================================================================
// Tree algorithms
// ============================================================================

/// First index in `0..len` for which `pred` is false; `pred` must be true
/// on a prefix.
fn partition_point<F>(len: usize, mut pred: F) -> Result<usize>
where
    F: FnMut(usize) -> Result<bool>,
{
    let (mut low, mut high) = (0, len);
    while low < high {
        let mid = low + (high - low) / 2;
        if pred(mid)? {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    Ok(low)
}

/// First key position not less than `key`.
fn lower_bound(node: &mut BTreeNode, cmp: &Comparator<'_>, key: RowId) -> Result<usize> {
    let keys = node.keys()?;
    partition_point(keys.len(), |i| {
        Ok(cmp.compare_keys(keys[i], key)? == Ordering::Less)
    })
}

/// First key position greater than `key`.
fn upper_bound(node: &mut BTreeNode, cmp: &Comparator<'_>, key: RowId) -> Result<usize> {
    let keys = node.keys()?;
    partition_point(keys.len(), |i| {
        Ok(cmp.compare_keys(keys[i], key)? != Ordering::Greater)
    })
}

/// Split the full child at `index` around its median, which moves up into
/// `parent`.
fn split_child(parent: &mut BTreeNode, index: usize, degree: usize) -> Result<()> {
    let child = parent.child_mut(index)?;

    let right_keys = child.split_off_keys(degree)?;
    let median = child.pop_key()?;
    let right_children = if child.is_leaf()? {
        Vec::new()
    } else {
        child.split_off_children(degree)?
    };

    let mut sibling = child.new_sibling();
    sibling.extend_keys(right_keys)?;
    sibling.extend_children(right_children)?;

    parent.insert_key(index, median)?;
    parent.insert_child(index + 1, sibling)?;

    trace!(index, median = median.0, "node split");
    Ok(())
}

fn insert_non_full(
    root: &mut BTreeNode,
    cmp: &Comparator<'_>,
    key: RowId,
    duplicates: bool,
    degree: usize,
) -> Result<()> {
    let mut node = root;

    loop {
        let mut index = upper_bound(node, cmp, key)?;

        if !duplicates && index > 0 && cmp.compare_keys(node.key(index - 1)?, key)? == Ordering::Equal
        {
            return Err(Error::DuplicateKey { row: key.0 });
        }

        if node.is_leaf()? {
            return node.insert_key(index, key);
        }

        if node.child_mut(index)?.has_reached_max_size()? {
            split_child(node, index, degree)?;

            match cmp.compare_keys(key, node.key(index)?)? {
                Ordering::Greater => index += 1,
                Ordering::Equal if !duplicates => {
                    return Err(Error::DuplicateKey { row: key.0 });
                }
                _ => {}
            }
        }

        node = node.child_mut(index)?;
    }
}

/// Delete `key` from the subtree rooted at `node`, which holds at least
/// `degree` keys unless it is the root.
fn delete_from(
    node: &mut BTreeNode,
    cmp: &Comparator<'_>,
    key: RowId,
    degree: usize,
) -> Result<bool> {
    let index = lower_bound(node, cmp, key)?;
    let key_count = node.key_count()?;

    if index < key_count && cmp.compare_keys(node.key(index)?, key)? == Ordering::Equal {
        // Equal values under another ordinal: the ordinal is not indexed.
        if node.key(index)? != key {
            return Ok(false);
        }
        delete_at(node, cmp, index, degree)?;
        return Ok(true);
    }

    if node.is_leaf()? {
        return Ok(false);
    }

    let child_index = fill_child(node, index, degree)?;
    delete_from(node.child_mut(child_index)?, cmp, key, degree)
}

/// Remove the key at `index` of `node`.
fn delete_at(
    node: &mut BTreeNode,
    cmp: &Comparator<'_>,
    index: usize,
    degree: usize,
) -> Result<()> {
    if node.is_leaf()? {
        node.remove_key(index)?;
        return Ok(());
    }

    if node.child_mut(index)?.can_spare_key()? {
        let predecessor = max_key(node.child_mut(index)?)?;
        node.set_key(index, predecessor)?;
        delete_from(node.child_mut(index)?, cmp, predecessor, degree)?;
    } else if node.child_mut(index + 1)?.can_spare_key()? {
        let successor = min_key(node.child_mut(index + 1)?)?;
        node.set_key(index, successor)?;
        delete_from(node.child_mut(index + 1)?, cmp, successor, degree)?;
    } else {
        let key = node.key(index)?;
        merge_children(node, index)?;
        delete_from(node.child_mut(index)?, cmp, key, degree)?;
    }
    Ok(())
}

/// Make sure the child at `index` holds at least `degree` keys before the
/// descent enters it. Returns the index of the child to descend into, which
/// moves left when the child was merged into its left sibling.
fn fill_child(parent: &mut BTreeNode, index: usize, degree: usize) -> Result<usize> {
    if parent.child_mut(index)?.can_spare_key()? {
        return Ok(index);
    }

    let child_count = parent.child_count()?;

    if index > 0 && parent.child_mut(index - 1)?.can_spare_key()? {
        let left = parent.child_mut(index - 1)?;
        let borrowed_key = left.pop_key()?;
        let borrowed_child = if left.is_leaf()? {
            None
        } else {
            Some(left.pop_child()?)
        };

        let separator = parent.key(index - 1)?;
        parent.set_key(index - 1, borrowed_key)?;

        let child = parent.child_mut(index)?;
        child.insert_key(0, separator)?;
        if let Some(borrowed) = borrowed_child {
            child.insert_child(0, borrowed)?;
        }

        trace!(index, "borrowed from left sibling");
        return Ok(index);
    }

    if index + 1 < child_count && parent.child_mut(index + 1)?.can_spare_key()? {
        let right = parent.child_mut(index + 1)?;
        let borrowed_key = right.remove_key(0)?;
        let borrowed_child = if right.is_leaf()? {
            None
        } else {
            Some(right.remove_child(0)?)
        };

        let separator = parent.key(index)?;
        parent.set_key(index, borrowed_key)?;

        let child = parent.child_mut(index)?;
        child.push_key(separator)?;
        if let Some(borrowed) = borrowed_child {
            child.push_child(borrowed)?;
        }

        trace!(index, "borrowed from right sibling");
        return Ok(index);
    }

    if index > 0 {
        merge_children(parent, index - 1)?;
        Ok(index - 1)
    } else {
        merge_children(parent, index)?;
        Ok(index)
    }
}

/// Merge child `index + 1` and the separator key `index` into child `index`.
fn merge_children(parent: &mut BTreeNode, index: usize) -> Result<()> {
    let separator = parent.remove_key(index)?;
    let right = parent.remove_child(index + 1)?;
    let (right_keys, right_children) = right.into_parts()?;

    let left = parent.child_mut(index)?;
    left.push_key(separator)?;
    left.extend_keys(right_keys)?;
    left.extend_children(right_children)?;

    trace!(index, "children merged");
    Ok(())
}

fn max_key(node: &mut BTreeNode) -> Result<RowId> {
    let mut node = node;
    while !node.is_leaf()? {
        let last = node.child_count()? - 1;
        node = node.child_mut(last)?;
    }
    let last = node
        .key_count()?
        .checked_sub(1)
        .ok_or_else(|| Error::StructuralInconsistency("empty leaf".into()))?;
    node.key(last)
}

fn min_key(node: &mut BTreeNode) -> Result<RowId> {
    let mut node = node;
    while !node.is_leaf()? {
        node = node.child_mut(0)?;
    }
    node.key(0)
}

fn collect_in_order(node: &mut BTreeNode, out: &mut Vec<RowId>) -> Result<()> {
    let keys = node.keys()?.to_vec();
    if node.is_leaf()? {
        out.extend(keys);
        return Ok(());
    }

    let children = node.children_mut()?;
    for (i, child) in children.iter_mut().enumerate() {
        collect_in_order(child, out)?;
        if let Some(key) = keys.get(i) {
            out.push(*key);
        }
    }
    Ok(())
}

struct Validation<'c, 'a> {
    cmp: &'c Comparator<'a>,
    degree: usize,
    height: usize,
}

impl Validation<'_, '_> {
    fn node(
        &mut self,
        node: &mut BTreeNode,
        depth: usize,
        is_root: bool,
        lower: Option<RowId>,
        upper: Option<RowId>,
    ) -> Result<()> {
        let keys = node.keys()?.to_vec();
        let max = 2 * self.degree - 1;
        let min = if is_root { 0 } else { self.degree - 1 };

        if keys.len() > max || keys.len() < min {
            return Err(inconsistent(format!(
                "node at depth {} holds {} keys, expected {}..={}",
                depth,
                keys.len(),
                min,
                max
            )));
        }

        for pair in keys.windows(2) {
            if self.cmp.compare_keys(pair[0], pair[1])? != Ordering::Less {
                return Err(inconsistent(format!(
                    "keys {} and {} out of order at depth {}",
                    pair[0], pair[1], depth
                )));
            }
        }
        if let (Some(bound), Some(first)) = (lower, keys.first()) {
            if self.cmp.compare_keys(bound, *first)? != Ordering::Less {
                return Err(inconsistent(format!("{} not above separator {}", first, bound)));
            }
        }
        if let (Some(bound), Some(last)) = (upper, keys.last()) {
            if self.cmp.compare_keys(*last, bound)? != Ordering::Less {
                return Err(inconsistent(format!("{} not below separator {}", last, bound)));
            }
        }

        if node.is_leaf()? {
            if depth != self.height {
                return Err(inconsistent(format!(
                    "leaf at depth {} in tree of height {}",
                    depth, self.height
                )));
            }
            return Ok(());
        }

        let children = node.children_mut()?;
        if children.len() != keys.len() + 1 {
            return Err(inconsistent(format!(
                "node with {} keys has {} children",
                keys.len(),
                children.len()
            )));
        }

        for (i, child) in children.iter_mut().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
            let child_upper = keys.get(i).copied().or(upper);
            self.node(child, depth + 1, false, child_lower, child_upper)?;
        }
        Ok(())
    }
}

fn inconsistent(message: String) -> Error {
    Error::StructuralInconsistency(message)
}
