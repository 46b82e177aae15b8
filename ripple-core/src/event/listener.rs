//! Listener types.
//!
//! A listener is anything the publisher can hand a change event to: a plain
//! callback at the edge of the graph, or a derived list reacting to its
//! source.

use super::change_event::ChangeEvent;

/// Receives change events from the lists it is subscribed to.
///
/// Callbacks run on the thread that started the transaction, with every
/// upstream list already settled. Reading any list from inside the callback
/// is safe. Mutating a list from inside the callback folds the mutation into
/// the running transaction.
pub trait ListEventListener: Send + Sync {
    /// Called once per publishing source per transaction.
    fn list_changed(&self, event: ChangeEvent);
}

/// A listener built from a closure.
///
/// Useful for terminal sinks (logging, rendering, counters) that do not need
/// their own type.
pub struct FnListener {
    callback: Box<dyn Fn(ChangeEvent) + Send + Sync>,
}

impl FnListener {
    /// Create a new listener invoking `callback` for every delivered event.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl ListEventListener for FnListener {
    fn list_changed(&self, event: ChangeEvent) {
        (self.callback)(event);
    }
}

impl std::fmt::Debug for FnListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeBlock;
    use crate::graph::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fn_listener_calls_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let listener = FnListener::new(move |mut event| {
            seen_clone.fetch_add(event.drain(), Ordering::SeqCst);
        });

        let blocks: Arc<[ChangeBlock]> = vec![ChangeBlock::insert(0, 1)].into();
        listener.list_changed(ChangeEvent::new(NodeId::new(), blocks));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
