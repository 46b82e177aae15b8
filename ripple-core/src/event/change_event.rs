//! Change Events
//!
//! A change event is the ordered list of blocks one list published during
//! one transaction. The blocks are shared and immutable; every delivery hands
//! the listener its own cursor, so one listener draining or walking its event
//! never moves another listener's read position.

use std::sync::Arc;

use super::block::{push_coalesced, ChangeBlock};
use crate::error::{Result, RippleError};
use crate::graph::NodeId;

/// A forward-only cursor over the blocks one list published in a transaction.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The list that published these blocks.
    source: NodeId,

    /// Shared across every cursor issued for the same publication.
    blocks: Arc<[ChangeBlock]>,

    /// Index of the next block to hand out.
    position: usize,
}

impl ChangeEvent {
    pub(crate) fn new(source: NodeId, blocks: Arc<[ChangeBlock]>) -> Self {
        Self {
            source,
            blocks,
            position: 0,
        }
    }

    /// Join blocks the same list published after this event was queued.
    ///
    /// The new blocks follow the existing ones, so the joined sequence stays
    /// index-consistent. Only valid before the cursor has moved.
    pub(crate) fn append(&mut self, blocks: &[ChangeBlock], coalesce: bool) {
        debug_assert_eq!(self.position, 0, "appending to an event already being read");
        let mut joined = self.blocks.to_vec();
        for block in blocks {
            if coalesce {
                push_coalesced(&mut joined, *block);
            } else {
                joined.push(*block);
            }
        }
        self.blocks = joined.into();
    }

    /// The list that published this event.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Advance the cursor and return the next block.
    pub fn next_block(&mut self) -> Result<ChangeBlock> {
        let block = self
            .blocks
            .get(self.position)
            .copied()
            .ok_or(RippleError::ExhaustedCursor {
                len: self.blocks.len(),
            })?;
        self.position += 1;
        Ok(block)
    }

    /// Check whether another block is available without consuming it.
    pub fn has_next(&self) -> bool {
        self.position < self.blocks.len()
    }

    /// Number of blocks this cursor has not read yet.
    pub fn remaining(&self) -> usize {
        self.blocks.len() - self.position
    }

    /// Skip every remaining block, marking the event fully consumed.
    ///
    /// Returns how many blocks were skipped. Listeners that only care that
    /// *something* changed call this and ignore the details.
    pub fn drain(&mut self) -> usize {
        let skipped = self.remaining();
        self.position = self.blocks.len();
        skipped
    }

    /// Whether the cursor has reached the end.
    pub fn is_consumed(&self) -> bool {
        !self.has_next()
    }

    /// All blocks of the event, regardless of the cursor position.
    pub fn blocks(&self) -> &[ChangeBlock] {
        &self.blocks
    }

    /// Total number of blocks in the event.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Iterator for ChangeEvent {
    type Item = ChangeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChangeEvent {}
