//! Graph Nodes
//!
//! This module defines the node and edge types that live in the dependency graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::event::ListEventListener;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A list mutated directly by user code. It publishes but never listens.
    Source,

    /// A derived list. It listens to its sources and republishes its own
    /// changes, so the scheduler continues past it.
    Derived,

    /// A plain listener. It receives events but publishes nothing; delivery
    /// stops here.
    Listener,
}

impl NodeKind {
    /// Whether the node can publish change events of its own.
    pub fn publishes(&self) -> bool {
        matches!(self, NodeKind::Source | NodeKind::Derived)
    }

    /// Whether the node has a listener callback.
    pub fn listens(&self) -> bool {
        matches!(self, NodeKind::Derived | NodeKind::Listener)
    }
}

/// How a sink depends on its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The sink receives the source's change events.
    Structural,

    /// The sink is only ordered after the source; no events are forwarded.
    /// Used when the sink already observes the source's effects through
    /// another path but must not run before it.
    Extra,
}

impl EdgeKind {
    /// Whether events travel along the edge.
    pub fn forwards(&self) -> bool {
        *self == EdgeKind::Structural
    }
}

/// A node in the dependency graph.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// The callback invoked on delivery, for nodes that listen.
    /// Held weakly so the graph never keeps a dropped list alive.
    listener: Option<Weak<dyn ListEventListener>>,

    /// Nodes this node listens to, in registration order.
    sources: IndexMap<NodeId, EdgeKind>,

    /// Nodes listening to this node, in registration order.
    /// Delivery order follows this order.
    sinks: IndexMap<NodeId, EdgeKind>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(NodeId::new(), kind)
    }

    /// Create a node for an identifier allocated elsewhere.
    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            listener: None,
            sources: IndexMap::new(),
            sinks: IndexMap::new(),
        }
    }

    /// Create a new source list node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived list node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new plain listener node.
    pub fn plain_listener() -> Self {
        Self::new(NodeKind::Listener)
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Attach the callback invoked when events are delivered to this node.
    pub fn set_listener(&mut self, listener: Weak<dyn ListEventListener>) {
        self.listener = Some(listener);
    }

    /// Get the node's callback, if it has one and it is still alive.
    pub fn listener(&self) -> Option<Arc<dyn ListEventListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }

    /// Record that this node listens to `source`.
    ///
    /// An existing extra edge is upgraded to structural, never downgraded.
    pub fn add_source(&mut self, source: NodeId, kind: EdgeKind) {
        upsert_edge(&mut self.sources, source, kind);
    }

    /// Forget `source`. Returns whether an edge existed.
    pub fn remove_source(&mut self, source: NodeId) -> bool {
        self.sources.shift_remove(&source).is_some()
    }

    /// Get all sources with their edge kinds.
    pub fn sources(&self) -> &IndexMap<NodeId, EdgeKind> {
        &self.sources
    }

    /// Record that `sink` listens to this node.
    pub fn add_sink(&mut self, sink: NodeId, kind: EdgeKind) {
        upsert_edge(&mut self.sinks, sink, kind);
    }

    /// Forget `sink`. Returns whether an edge existed.
    pub fn remove_sink(&mut self, sink: NodeId) -> bool {
        self.sinks.shift_remove(&sink).is_some()
    }

    /// Get all sinks with their edge kinds.
    pub fn sinks(&self) -> &IndexMap<NodeId, EdgeKind> {
        &self.sinks
    }
}

fn upsert_edge(edges: &mut IndexMap<NodeId, EdgeKind>, id: NodeId, kind: EdgeKind) {
    let entry = edges.entry(id).or_insert(kind);
    if kind == EdgeKind::Structural {
        *entry = EdgeKind::Structural;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("sources", &self.sources)
            .field("sinks", &self.sinks)
            .finish()
    }
}
