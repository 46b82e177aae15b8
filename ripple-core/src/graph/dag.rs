//! Dependency Graph Storage
//!
//! Owns every node and edge known to a publisher. Edges are stored on both
//! ends (sources on the sink, sinks on the source) so the scheduler can walk
//! downstream and teardown can walk upstream.
//!
//! The graph is kept acyclic: an edge that would let a node reach itself is
//! rejected before anything is modified.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;

use super::node::{EdgeKind, Node, NodeId};
use crate::error::{Result, RippleError};

/// Outgoing edges of one node, captured when a transaction opens.
pub(crate) type SinkList = SmallVec<[(NodeId, EdgeKind); 4]>;

/// All nodes of one publisher, indexed by ID.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for source_id in node.sources().keys() {
            if let Some(source) = self.nodes.get_mut(source_id) {
                source.remove_sink(node_id);
            }
        }

        for sink_id in node.sinks().keys() {
            if let Some(sink) = self.nodes.get_mut(sink_id) {
                sink.remove_source(node_id);
            }
        }

        Some(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Add an edge: `sink` depends on `source`.
    ///
    /// Fails without touching the graph if either node is unknown or the edge
    /// would close a cycle.
    pub fn add_edge(&mut self, source: NodeId, sink: NodeId, kind: EdgeKind) -> Result<()> {
        if !self.contains(source) {
            return Err(RippleError::UnknownNode(source));
        }
        if !self.contains(sink) {
            return Err(RippleError::UnknownNode(sink));
        }
        if self.reaches(sink, source) {
            return Err(RippleError::CycleDetected {
                upstream: source,
                downstream: sink,
            });
        }

        if let Some(source_node) = self.nodes.get_mut(&source) {
            source_node.add_sink(sink, kind);
        }
        if let Some(sink_node) = self.nodes.get_mut(&sink) {
            sink_node.add_source(source, kind);
        }
        Ok(())
    }

    /// Remove an edge. Returns whether it existed.
    pub fn remove_edge(&mut self, source: NodeId, sink: NodeId) -> bool {
        let removed = self
            .nodes
            .get_mut(&source)
            .map(|node| node.remove_sink(sink))
            .unwrap_or(false);
        if let Some(sink_node) = self.nodes.get_mut(&sink) {
            sink_node.remove_source(source);
        }
        removed
    }

    /// Check whether `to` is reachable from `from` by following sink edges.
    ///
    /// A node always reaches itself.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from);

        while let Some(node_id) = queue.pop_front() {
            if node_id == to {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.sinks().keys().copied());
            }
        }

        false
    }

    /// Capture the outgoing edges of every node.
    ///
    /// A transaction delivers along this snapshot only, so edges registered
    /// while it runs wait for the next transaction.
    pub(crate) fn snapshot_sinks(&self) -> HashMap<NodeId, SinkList> {
        self.nodes
            .iter()
            .filter(|(_, node)| !node.sinks().is_empty())
            .map(|(id, node)| {
                let sinks = node.sinks().iter().map(|(sink, kind)| (*sink, *kind)).collect();
                (*id, sinks)
            })
            .collect()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.sinks().len()).sum()
    }
}
