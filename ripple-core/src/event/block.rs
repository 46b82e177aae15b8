//! Change Blocks
//!
//! A change block records one contiguous index-range mutation of a list.
//! Blocks recorded against one list within one transaction are sequential:
//! the indices of a later block already account for every earlier block.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// What happened to the indices covered by a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// New elements now occupy the range.
    Insert,

    /// The elements that occupied the range were removed.
    Delete,

    /// The elements in the range were replaced in place.
    Update,
}

/// One contiguous index-range mutation.
///
/// The range is half-open and never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeBlock {
    kind: ChangeKind,
    start: usize,
    end: usize,
}

impl ChangeBlock {
    /// Create a block covering `start..end`.
    pub fn new(kind: ChangeKind, start: usize, end: usize) -> Self {
        debug_assert!(start < end, "change block must cover at least one index");
        Self { kind, start, end }
    }

    pub fn insert(start: usize, end: usize) -> Self {
        Self::new(ChangeKind::Insert, start, end)
    }

    pub fn delete(start: usize, end: usize) -> Self {
        Self::new(ChangeKind::Delete, start, end)
    }

    pub fn update(start: usize, end: usize) -> Self {
        Self::new(ChangeKind::Update, start, end)
    }

    /// Get the kind of change.
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// First affected index.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last affected index.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Fold `next`, which happened right after `self`, into a single block.
    ///
    /// Returns `None` when the two blocks cannot be expressed as one
    /// contiguous range of the same kind.
    pub fn merge(&self, next: &ChangeBlock) -> Option<ChangeBlock> {
        match (self.kind, next.kind) {
            // The second insert lands inside (or at either edge of) the first.
            (ChangeKind::Insert, ChangeKind::Insert)
                if next.start >= self.start && next.start <= self.end =>
            {
                Some(ChangeBlock::insert(self.start, self.end + next.len()))
            }

            (ChangeKind::Delete, ChangeKind::Delete) if next.start == self.start => {
                Some(ChangeBlock::delete(self.start, self.end + next.len()))
            }
            (ChangeKind::Delete, ChangeKind::Delete) if next.end == self.start => {
                Some(ChangeBlock::delete(next.start, self.end))
            }

            (ChangeKind::Update, ChangeKind::Update)
                if next.start <= self.end && self.start <= next.end =>
            {
                Some(ChangeBlock::update(
                    self.start.min(next.start),
                    self.end.max(next.end),
                ))
            }

            _ => None,
        }
    }
}

/// Append `block` to `blocks`, coalescing it into the last block if possible.
pub(crate) fn push_coalesced(blocks: &mut Vec<ChangeBlock>, block: ChangeBlock) {
    if let Some(last) = blocks.last_mut() {
        if let Some(merged) = last.merge(&block) {
            *last = merged;
            return;
        }
    }
    blocks.push(block);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_inserts_merge() {
        let merged = ChangeBlock::insert(3, 4).merge(&ChangeBlock::insert(4, 6));
        assert_eq!(merged, Some(ChangeBlock::insert(3, 6)));
    }

    #[test]
    fn insert_in_the_middle_of_insert_merges() {
        let merged = ChangeBlock::insert(0, 4).merge(&ChangeBlock::insert(2, 3));
        assert_eq!(merged, Some(ChangeBlock::insert(0, 5)));
    }

    #[test]
    fn disjoint_inserts_do_not_merge() {
        assert!(ChangeBlock::insert(0, 2).merge(&ChangeBlock::insert(5, 6)).is_none());
    }

    #[test]
    fn repeated_deletes_at_same_index_merge() {
        // Deleting index 2 three times removes original indices 2..5.
        let mut blocks = Vec::new();
        push_coalesced(&mut blocks, ChangeBlock::delete(2, 3));
        push_coalesced(&mut blocks, ChangeBlock::delete(2, 3));
        push_coalesced(&mut blocks, ChangeBlock::delete(2, 3));
        assert_eq!(blocks, vec![ChangeBlock::delete(2, 5)]);
    }

    #[test]
    fn backwards_deletes_merge() {
        let merged = ChangeBlock::delete(4, 6).merge(&ChangeBlock::delete(2, 4));
        assert_eq!(merged, Some(ChangeBlock::delete(2, 6)));
    }

    #[test]
    fn overlapping_updates_merge() {
        let merged = ChangeBlock::update(1, 3).merge(&ChangeBlock::update(2, 5));
        assert_eq!(merged, Some(ChangeBlock::update(1, 5)));
    }

    #[test]
    fn mixed_kinds_stay_separate() {
        let mut blocks = Vec::new();
        push_coalesced(&mut blocks, ChangeBlock::insert(0, 1));
        push_coalesced(&mut blocks, ChangeBlock::update(0, 1));
        push_coalesced(&mut blocks, ChangeBlock::delete(0, 1));
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn block_accessors() {
        let block = ChangeBlock::update(2, 7);
        assert_eq!(block.kind(), ChangeKind::Update);
        assert_eq!(block.range(), 2..7);
        assert_eq!(block.len(), 5);
        assert!(!block.is_empty());
    }
}
