//! Observable List Implementation
//!
//! An observable list is a `Vec` that reports every mutation to its
//! publisher as a change block.
//!
//! # How Observable Lists Work
//!
//! 1. A mutation takes the publisher's transaction lock, applies the change
//!    to the backing storage and records the matching block.
//!
//! 2. Outside a transaction the publisher propagates immediately, so the
//!    call returns only after every dependent list and listener has reacted.
//!
//! 3. Inside a listener callback or a batch, the block joins the
//!    transaction being assembled instead.
//!
//! Storage is updated before the block is recorded, so reading a list from
//! any callback always shows every change it has published.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RippleError};
use crate::event::ChangeBlock;
use crate::graph::{EdgeKind, NodeId, NodeKind, Publisher};

/// A single edit applied through [`ObservableList::mutate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Append one element.
    Push(T),

    /// Insert `items` so the first lands at `index`.
    Insert { index: usize, items: Vec<T> },

    /// Remove the elements in `start..end`.
    Remove { start: usize, end: usize },

    /// Overwrite elements starting at `index`.
    Set { index: usize, items: Vec<T> },

    /// Remove every element.
    Clear,
}

/// A mutable sequence whose changes are published to its listeners.
///
/// # Example
///
/// ```rust,ignore
/// let publisher = Publisher::new();
/// let list = ObservableList::new(&publisher);
///
/// let handle = publisher.add_listener(Arc::new(FnListener::new(|mut event| {
///     println!("{} blocks changed", event.drain());
/// })));
/// list.subscribe(handle.id())?;
///
/// list.push("Genesis");  // Prints: "1 blocks changed"
/// ```
pub struct ObservableList<T> {
    /// This list's node in the publisher's graph.
    id: NodeId,

    publisher: Arc<Publisher>,

    items: RwLock<Vec<T>>,
}

impl<T> ObservableList<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new empty source list.
    pub fn new(publisher: &Arc<Publisher>) -> Self {
        Self::from_vec(publisher, Vec::new())
    }

    /// Create a source list holding `items`. No event is published for them.
    pub fn from_vec(publisher: &Arc<Publisher>, items: Vec<T>) -> Self {
        Self::with_kind(publisher, NodeKind::Source, items)
    }

    /// Create the output list of a derived list.
    pub(crate) fn with_kind(publisher: &Arc<Publisher>, kind: NodeKind, items: Vec<T>) -> Self {
        Self {
            id: publisher.register_node(kind),
            publisher: Arc::clone(publisher),
            items: RwLock::new(items),
        }
    }

    /// Apply `mutation` and publish the resulting block.
    ///
    /// Mutations that touch nothing (empty inserts, clearing an empty list)
    /// publish nothing. Out-of-range indices fail without modifying the list.
    pub fn mutate(&self, mutation: Mutation<T>) -> Result<()> {
        self.edit(|items| {
            let len = items.len();
            let block = match mutation {
                Mutation::Push(item) => {
                    items.push(item);
                    Some(ChangeBlock::insert(len, len + 1))
                }
                Mutation::Insert { index, items: new } => {
                    if index > len {
                        return Err(RippleError::IndexOutOfBounds { index, len });
                    }
                    let count = new.len();
                    items.splice(index..index, new);
                    (count > 0).then(|| ChangeBlock::insert(index, index + count))
                }
                Mutation::Remove { start, end } => {
                    if start > end || end > len {
                        return Err(RippleError::IndexOutOfBounds { index: end, len });
                    }
                    items.drain(start..end);
                    (start < end).then(|| ChangeBlock::delete(start, end))
                }
                Mutation::Set { index, items: new } => {
                    let end = match index.checked_add(new.len()) {
                        Some(end) if end <= len => end,
                        // Report the last index the write would have touched.
                        end => {
                            let last = end.map_or(index, |end| end.saturating_sub(1).max(index));
                            return Err(RippleError::IndexOutOfBounds { index: last, len });
                        }
                    };
                    let count = new.len();
                    items.splice(index..end, new);
                    (count > 0).then(|| ChangeBlock::update(index, end))
                }
                Mutation::Clear => {
                    items.clear();
                    (len > 0).then(|| ChangeBlock::delete(0, len))
                }
            };
            Ok((block, ()))
        })
    }

    /// Apply an edit to the storage and publish the block it reports.
    fn edit<R>(
        &self,
        f: impl FnOnce(&mut Vec<T>) -> Result<(Option<ChangeBlock>, R)>,
    ) -> Result<R> {
        let _guard = self.publisher.lock();
        let (block, result) = {
            let mut items = self.items.write();
            f(&mut items)?
        };
        if let Some(block) = block {
            self.publisher.notify_mutated(self.id, [block])?;
        }
        Ok(result)
    }

    /// Append an element.
    pub fn push(&self, item: T) {
        // Pushing is always in bounds; the node outlives `self`.
        let pushed = self.mutate(Mutation::Push(item));
        debug_assert!(pushed.is_ok(), "push failed: {pushed:?}");
    }

    /// Append every element of `items` as one block.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        let extended = self.edit(|storage| {
            let start = storage.len();
            storage.extend(items);
            let end = storage.len();
            Ok(((start < end).then(|| ChangeBlock::insert(start, end)), ()))
        });
        debug_assert!(extended.is_ok(), "extend failed: {extended:?}");
    }

    /// Insert an element at `index`.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.mutate(Mutation::Insert {
            index,
            items: vec![item],
        })
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Result<T> {
        self.edit(|items| {
            if index >= items.len() {
                return Err(RippleError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            let removed = items.remove(index);
            Ok((Some(ChangeBlock::delete(index, index + 1)), removed))
        })
    }

    /// Replace the element at `index`, returning the previous one.
    pub fn set(&self, index: usize, item: T) -> Result<T> {
        self.edit(|items| {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(RippleError::IndexOutOfBounds { index, len })?;
            let previous = std::mem::replace(slot, item);
            Ok((Some(ChangeBlock::update(index, index + 1)), previous))
        })
    }

    /// Remove every element.
    pub fn clear(&self) {
        let cleared = self.mutate(Mutation::Clear);
        debug_assert!(cleared.is_ok(), "clear failed: {cleared:?}");
    }

    /// Run `f` with every mutation it makes published as one transaction.
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.publisher.batch(|| f(self))
    }

    /// Copy out the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.read().clone()
    }

    /// Get the element at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    /// Run `f` over the current contents without copying them.
    ///
    /// `f` must not mutate this list.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.items.read())
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Deliver this list's events to `sink`, starting with the next transaction.
    pub fn subscribe(&self, sink: NodeId) -> Result<()> {
        self.publisher
            .register_edge(self.id, sink, EdgeKind::Structural)
    }

    /// Stop delivering to `sink`. Unknown subscriptions are ignored.
    pub fn unsubscribe(&self, sink: NodeId) {
        self.publisher.unregister_edge(self.id, sink);
    }

    /// Make `sink` wait for this list without receiving its events.
    pub fn depend(&self, sink: NodeId) -> Result<()> {
        self.publisher.register_edge(self.id, sink, EdgeKind::Extra)
    }
}

impl<T> ObservableList<T> {
    /// Get the list's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the publisher this list reports to.
    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }
}

impl<T> Drop for ObservableList<T> {
    fn drop(&mut self) {
        self.publisher.remove_node(self.id);
    }
}

impl<T> std::fmt::Debug for ObservableList<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("id", &self.id)
            .field("items", &*self.items.read())
            .finish()
    }
}
