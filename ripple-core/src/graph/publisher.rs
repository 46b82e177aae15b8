//! Publisher
//!
//! The publisher is the central coordinator that connects lists and
//! listeners. It owns the dependency graph and runs the delivery scheduler
//! whenever a list changes.
//!
//! # How It Works
//!
//! 1. Lists and listeners register as nodes; subscriptions become edges.
//!
//! 2. A list mutation records its blocks with the publisher. If no
//!    transaction is open, one is opened over a snapshot of the edges.
//!
//! 3. Unless the mutation happened inside a batch or inside a listener
//!    callback, the publisher then drives the transaction to its fixpoint:
//!    it repeatedly pops a ready node, invokes its listener once per queued
//!    event, and settles it so its own sinks can become ready.
//!
//! 4. Mutations made from within a callback are recorded into the running
//!    transaction and scheduled by the same loop. Nothing recurses.
//!
//! # Thread Safety
//!
//! A re-entrant lock is held for the whole of a transaction, so a mutation
//! from another thread waits until the current propagation has settled,
//! while callbacks on the delivering thread can mutate freely. The graph
//! bookkeeping sits behind a separate mutex that is never held while user
//! code runs.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::dag::DependencyGraph;
use super::node::{EdgeKind, Node, NodeId, NodeKind};
use super::scheduler::Transaction;
use crate::config::PublisherConfig;
use crate::error::{Result, RippleError};
use crate::event::{ChangeBlock, ListEventListener};

/// Counters describing the work a publisher has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    /// Transactions that reached their fixpoint.
    pub transactions: u64,

    /// Change events handed to structural sinks.
    pub deliveries: u64,

    /// Blocks published, after coalescing.
    pub blocks: u64,
}

#[derive(Debug, Default)]
struct PublisherState {
    graph: DependencyGraph,

    /// The open transaction, if any.
    transaction: Option<Transaction>,

    /// Nesting depth of [`Publisher::batch`] calls.
    batch_depth: usize,

    /// Set while the scheduler loop runs.
    delivering: bool,

    stats: PublisherStats,
}

/// Owns a dependency graph and delivers change events along it.
///
/// Create one per family of related lists and share it through `Arc`.
pub struct Publisher {
    config: PublisherConfig,

    /// Held for a full transaction.
    transaction_lock: ReentrantMutex<()>,

    state: Mutex<PublisherState>,
}

impl Publisher {
    /// Create a publisher with default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(PublisherConfig::default())
    }

    /// Create a publisher with the given configuration.
    pub fn with_config(config: PublisherConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            transaction_lock: ReentrantMutex::new(()),
            state: Mutex::new(PublisherState::default()),
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Acquire the transaction lock.
    ///
    /// Lists hold this across a storage change and the matching
    /// [`notify_mutated`](Self::notify_mutated) call.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.transaction_lock.lock()
    }

    /// Add a node of the given kind to the graph.
    pub fn register_node(&self, kind: NodeKind) -> NodeId {
        let _guard = self.lock();
        self.state.lock().graph.add_node(Node::new(kind))
    }

    /// Attach the callback invoked when events reach `node`.
    pub fn attach_listener(&self, node: NodeId, listener: Weak<dyn ListEventListener>) -> Result<()> {
        let _guard = self.lock();
        let mut state = self.state.lock();
        let entry = state
            .graph
            .get_node_mut(node)
            .ok_or(RippleError::UnknownNode(node))?;
        entry.set_listener(listener);
        Ok(())
    }

    /// Remove a node and every edge touching it. Unknown nodes are ignored.
    pub fn remove_node(&self, node: NodeId) {
        let _guard = self.lock();
        if self.state.lock().graph.remove_node(node).is_none() {
            debug!(?node, "ignoring removal of unknown node");
        }
    }

    /// Register a plain listener node.
    ///
    /// The listener stays registered until the returned handle is dropped.
    pub fn add_listener(self: &Arc<Self>, listener: Arc<dyn ListEventListener>) -> ListenerHandle {
        let id = self.register_node(NodeKind::Listener);
        {
            let _guard = self.lock();
            if let Some(node) = self.state.lock().graph.get_node_mut(id) {
                node.set_listener(Arc::downgrade(&listener));
            }
        }
        ListenerHandle {
            publisher: Arc::clone(self),
            id,
            _listener: listener,
        }
    }

    /// Add an edge so that `sink` depends on `source`.
    ///
    /// Structural edges forward `source`'s events to `sink`; extra edges
    /// only force `sink` to run after `source` settled. Registering an edge
    /// that exists already never duplicates it, though it may upgrade an
    /// extra edge to structural. Takes effect with the next transaction.
    pub fn register_edge(&self, source: NodeId, sink: NodeId, kind: EdgeKind) -> Result<()> {
        let _guard = self.lock();
        self.state.lock().graph.add_edge(source, sink, kind)?;
        debug!(?source, ?sink, ?kind, "registered edge");
        Ok(())
    }

    /// Remove the edge between `source` and `sink`. Absent edges are ignored.
    pub fn unregister_edge(&self, source: NodeId, sink: NodeId) {
        let _guard = self.lock();
        if self.state.lock().graph.remove_edge(source, sink) {
            debug!(?source, ?sink, "unregistered edge");
        } else {
            debug!(?source, ?sink, "ignoring removal of unknown edge");
        }
    }

    /// Record blocks published by `node` and propagate them.
    ///
    /// Opens a transaction if none is in flight. Returns once every
    /// listener affected by the transaction has run, unless called inside a
    /// batch or a listener callback, in which case the blocks join the
    /// transaction already being assembled.
    pub fn notify_mutated(
        &self,
        node: NodeId,
        blocks: impl IntoIterator<Item = ChangeBlock>,
    ) -> Result<()> {
        let _guard = self.lock();
        {
            let mut state = self.state.lock();
            let PublisherState {
                graph, transaction, ..
            } = &mut *state;
            if !graph.contains(node) {
                return Err(RippleError::UnknownNode(node));
            }
            let transaction = transaction.get_or_insert_with(|| {
                debug!(root = ?node, "opening transaction");
                Transaction::new(graph.snapshot_sinks(), self.config.coalesce_blocks)
            });
            transaction.record(node, blocks);
        }
        self.flush();
        Ok(())
    }

    /// Run `f` with propagation deferred until it returns.
    ///
    /// Every mutation made inside `f` joins one transaction, so each sink sees
    /// at most one event per source for the whole batch. Nested batches
    /// flatten into the outermost one.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        let result = {
            let _batch = BatchGuard::enter(self);
            f()
        };
        self.flush();
        result
    }

    /// Drive the open transaction to its fixpoint.
    fn flush(&self) {
        {
            let mut state = self.state.lock();
            if state.delivering || state.batch_depth > 0 || state.transaction.is_none() {
                return;
            }
            state.delivering = true;
        }
        let _delivery = DeliveryGuard { publisher: self };

        loop {
            let next = {
                let mut state = self.state.lock();
                let PublisherState {
                    graph, transaction, ..
                } = &mut *state;
                transaction.as_mut().and_then(Transaction::pop_ready).map(
                    |(node, inbox, rounds)| {
                        let listener = graph.get_node(node).and_then(Node::listener);
                        (node, inbox, rounds, listener)
                    },
                )
            };
            let Some((node, inbox, rounds, listener)) = next else {
                break;
            };

            if rounds > self.config.max_rounds_per_node {
                warn!(
                    ?node,
                    rounds,
                    dropped = inbox.len(),
                    "node keeps being re-activated within one transaction; dropping its events"
                );
                self.settle(node, true);
                continue;
            }

            // No lock is held here: the listener may read or mutate any list.
            if let Some(listener) = listener {
                for event in inbox {
                    trace!(source = ?event.source(), sink = ?node, blocks = event.len(), "delivering");
                    listener.list_changed(event);
                }
            }

            self.settle(node, false);
        }
    }

    fn settle(&self, node: NodeId, abandon: bool) {
        let mut state = self.state.lock();
        let settled = state.transaction.as_mut().and_then(|transaction| {
            if abandon {
                transaction.abandon(node)
            } else {
                transaction.settle(node)
            }
        });
        match settled {
            Some(settled) => {
                state.stats.deliveries += settled.deliveries as u64;
                state.stats.blocks += settled.blocks as u64;
            }
            None => trace!(?node, "upstream re-activated during delivery; node waits again"),
        }
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    /// Work counters since the publisher was created.
    pub fn stats(&self) -> PublisherStats {
        self.state.lock().stats
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.state.lock().graph.node_count()
    }

    /// Get the total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.state.lock().graph.edge_count()
    }

    /// The nodes listening to `node`, in delivery order.
    pub fn sinks_of(&self, node: NodeId) -> Vec<(NodeId, EdgeKind)> {
        self.state
            .lock()
            .graph
            .get_node(node)
            .map(|n| n.sinks().iter().map(|(id, kind)| (*id, *kind)).collect())
            .unwrap_or_default()
    }

    /// The nodes `node` listens to, in registration order.
    pub fn sources_of(&self, node: NodeId) -> Vec<(NodeId, EdgeKind)> {
        self.state
            .lock()
            .graph
            .get_node(node)
            .map(|n| n.sources().iter().map(|(id, kind)| (*id, *kind)).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Publisher")
            .field("nodes", &state.graph.node_count())
            .field("edges", &state.graph.edge_count())
            .field("in_transaction", &state.transaction.is_some())
            .field("stats", &state.stats)
            .finish()
    }
}

/// Guard that ends a batch when dropped, even if the batch body panics.
struct BatchGuard<'a> {
    publisher: &'a Publisher,
}

impl<'a> BatchGuard<'a> {
    fn enter(publisher: &'a Publisher) -> Self {
        publisher.state.lock().batch_depth += 1;
        Self { publisher }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.publisher.state.lock();
        state.batch_depth = state.batch_depth.saturating_sub(1);
    }
}

/// Guard that closes the transaction when the scheduler loop exits.
///
/// If a listener panics, the half-delivered transaction is discarded so the
/// publisher stays usable.
struct DeliveryGuard<'a> {
    publisher: &'a Publisher,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.publisher.state.lock();
        state.delivering = false;
        if let Some(transaction) = state.transaction.take() {
            let stranded = transaction.stranded();
            if !stranded.is_empty() {
                warn!(?stranded, "transaction closed with unsettled nodes");
            }
            state.stats.transactions += 1;
            debug!(stats = ?state.stats, "closed transaction");
        }
    }
}

/// Handle to a registered listener.
///
/// Dropping this handle removes the listener and all of its edges.
pub struct ListenerHandle {
    publisher: Arc<Publisher>,
    id: NodeId,
    _listener: Arc<dyn ListEventListener>,
}

impl ListenerHandle {
    /// The listener's node in the graph.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Receive `source`'s change events.
    pub fn listen_to(&self, source: NodeId) -> Result<()> {
        self.publisher
            .register_edge(source, self.id, EdgeKind::Structural)
    }

    /// Run after `source` settles without receiving its events.
    pub fn depend_on(&self, source: NodeId) -> Result<()> {
        self.publisher.register_edge(source, self.id, EdgeKind::Extra)
    }

    /// Drop the edge from `source`, whatever its kind.
    pub fn stop_listening(&self, source: NodeId) {
        self.publisher.unregister_edge(source, self.id);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.publisher.remove_node(self.id);
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
