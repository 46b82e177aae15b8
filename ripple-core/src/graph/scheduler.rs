//! Delivery Scheduler
//!
//! A [`Transaction`] holds the bookkeeping for one propagation: which nodes
//! are waiting, what each has published, and which events are queued for
//! which listener. It never calls into user code; the publisher drives it.
//!
//! # Algorithm
//!
//! This is Kahn's algorithm run incrementally, so nodes can join while it
//! runs:
//!
//! 1. When a node gets new blocks it is *activated*. Activation walks
//!    downstream: every sink's pending-predecessor count goes up by one per
//!    active source, and the sink is activated in turn.
//! 2. A node whose count is zero is pushed onto the FIFO ready queue.
//! 3. Processing a node invokes its listener with every event in its inbox,
//!    then *settles* it: its output becomes one shared block list, a cursor
//!    goes into the inbox of each structural sink, and every sink's count
//!    drops by one. Sinks reaching zero join the ready queue.
//!
//! A node therefore runs only after every active upstream node settled, and
//! receives at most one event per incoming edge each time it runs. If an
//! upstream node is re-activated and settles again before the sink ran, its
//! new blocks are appended to the event already waiting in the inbox.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use smallvec::SmallVec;

use super::dag::SinkList;
use super::node::NodeId;
use crate::event::{push_coalesced, ChangeBlock, ChangeEvent};

/// Events waiting for a node's listener.
pub(crate) type Inbox = SmallVec<[ChangeEvent; 2]>;

/// Per-node state within one transaction.
#[derive(Debug, Default)]
struct NodeState {
    /// Active upstream nodes that have not settled yet.
    pending: usize,

    /// Activated and not yet settled.
    active: bool,

    /// Currently in the ready queue.
    queued: bool,

    /// Blocks this node published and has not delivered yet.
    output: Vec<ChangeBlock>,

    /// Events delivered to this node, in arrival order.
    inbox: Inbox,

    /// How many times the node has been processed.
    rounds: usize,
}

/// Outcome of settling a node.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Settled {
    /// Blocks published by the node.
    pub blocks: usize,

    /// Structural sinks that received an event.
    pub deliveries: usize,
}

/// The bookkeeping of one propagation.
#[derive(Debug)]
pub(crate) struct Transaction {
    /// Outgoing edges as they were when the transaction opened.
    edges: HashMap<NodeId, SinkList>,

    states: HashMap<NodeId, NodeState>,

    ready: VecDeque<NodeId>,

    coalesce: bool,
}

impl Transaction {
    /// Open a transaction over the given edge snapshot.
    pub fn new(edges: HashMap<NodeId, SinkList>, coalesce: bool) -> Self {
        Self {
            edges,
            states: HashMap::new(),
            ready: VecDeque::new(),
            coalesce,
        }
    }

    /// Record blocks published by `node` and activate it.
    pub fn record(&mut self, node: NodeId, blocks: impl IntoIterator<Item = ChangeBlock>) {
        let state = self.states.entry(node).or_default();
        for block in blocks {
            if self.coalesce {
                push_coalesced(&mut state.output, block);
            } else {
                state.output.push(block);
            }
        }
        self.activate(node);
    }

    /// Activate `node` and everything downstream of it.
    ///
    /// Already active nodes are left alone: their sinks are counted already.
    fn activate(&mut self, node: NodeId) {
        let mut stack = vec![node];

        while let Some(node_id) = stack.pop() {
            let state = self.states.entry(node_id).or_default();
            if state.active {
                continue;
            }
            state.active = true;
            if state.pending == 0 && !state.queued {
                state.queued = true;
                self.ready.push_back(node_id);
            }

            if let Some(sinks) = self.edges.get(&node_id) {
                for (sink, _) in sinks.iter().rev() {
                    self.states.entry(*sink).or_default().pending += 1;
                    stack.push(*sink);
                }
            }
        }
    }

    /// Pop the next node whose upstream has fully settled.
    ///
    /// Returns the node together with the events waiting for it.
    pub fn pop_ready(&mut self) -> Option<(NodeId, Inbox, usize)> {
        while let Some(node_id) = self.ready.pop_front() {
            let Some(state) = self.states.get_mut(&node_id) else {
                continue;
            };
            state.queued = false;
            // A re-activated upstream node made it wait again.
            if state.pending > 0 || !state.active {
                continue;
            }
            state.rounds += 1;
            return Some((node_id, std::mem::take(&mut state.inbox), state.rounds));
        }
        None
    }

    /// Settle `node` after its listener ran.
    ///
    /// Returns `None` if an upstream node was re-activated while it ran; the
    /// node stays active and is processed again once that node settles.
    pub fn settle(&mut self, node: NodeId) -> Option<Settled> {
        let state = self.states.get_mut(&node)?;
        if state.pending > 0 {
            return None;
        }
        state.active = false;
        let output = std::mem::take(&mut state.output);
        let mut settled = Settled {
            blocks: output.len(),
            deliveries: 0,
        };
        let shared: Option<Arc<[ChangeBlock]>> =
            (!output.is_empty()).then(|| output.into());

        let Some(sinks) = self.edges.get(&node) else {
            return Some(settled);
        };

        let coalesce = self.coalesce;
        for (sink, kind) in sinks.iter() {
            let sink_state = self.states.entry(*sink).or_default();
            if let (Some(blocks), true) = (&shared, kind.forwards()) {
                // A sink that has not run since this node last settled gets
                // one event holding both rounds, in publication order.
                match sink_state
                    .inbox
                    .iter()
                    .position(|event| event.source() == node)
                {
                    Some(queued) => sink_state.inbox[queued].append(blocks, coalesce),
                    None => {
                        sink_state
                            .inbox
                            .push(ChangeEvent::new(node, Arc::clone(blocks)));
                        settled.deliveries += 1;
                    }
                }
            }
            sink_state.pending = sink_state.pending.saturating_sub(1);
            if sink_state.pending == 0 && sink_state.active && !sink_state.queued {
                sink_state.queued = true;
                self.ready.push_back(*sink);
            }
        }

        Some(settled)
    }

    /// Settle `node` without running its listener, dropping its inbox.
    ///
    /// Used when a node keeps being re-activated by its own downstream.
    pub fn abandon(&mut self, node: NodeId) -> Option<Settled> {
        if let Some(state) = self.states.get_mut(&node) {
            state.inbox.clear();
            state.pending = 0;
        }
        self.settle(node)
    }

    /// Whether `node` has been activated and not settled yet.
    #[cfg(test)]
    pub fn is_active(&self, node: NodeId) -> bool {
        self.states.get(&node).is_some_and(|state| state.active)
    }

    /// Nodes still active although nothing is ready to run.
    pub fn stranded(&self) -> Vec<NodeId> {
        self.states
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyGraph, EdgeKind, Node};

    struct Diamond {
        graph: DependencyGraph,
        root: NodeId,
        a: NodeId,
        b: NodeId,
        leaf: NodeId,
    }

    fn diamond(leaf_b_kind: EdgeKind) -> Diamond {
        let mut graph = DependencyGraph::new();
        let root = graph.add_node(Node::source());
        let a = graph.add_node(Node::derived());
        let b = graph.add_node(Node::derived());
        let leaf = graph.add_node(Node::plain_listener());
        graph.add_edge(root, a, EdgeKind::Structural).unwrap();
        graph.add_edge(root, b, EdgeKind::Structural).unwrap();
        graph.add_edge(a, leaf, EdgeKind::Structural).unwrap();
        graph.add_edge(b, leaf, leaf_b_kind).unwrap();
        Diamond {
            graph,
            root,
            a,
            b,
            leaf,
        }
    }

    /// Drive the transaction, letting derived nodes republish one block.
    fn run(txn: &mut Transaction, derived: &[NodeId]) -> Vec<(NodeId, usize)> {
        let mut order = Vec::new();
        while let Some((node, inbox, _)) = txn.pop_ready() {
            order.push((node, inbox.len()));
            if derived.contains(&node) && !inbox.is_empty() {
                txn.record(node, [ChangeBlock::update(0, 1)]);
            }
            txn.settle(node).unwrap();
        }
        order
    }

    #[test]
    fn diamond_sink_runs_last_with_one_event_per_edge() {
        let d = diamond(EdgeKind::Structural);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.root, [ChangeBlock::insert(0, 1)]);

        let order = run(&mut txn, &[d.a, d.b]);
        assert_eq!(order, vec![(d.root, 0), (d.a, 1), (d.b, 1), (d.leaf, 2)]);
        assert!(txn.stranded().is_empty());
    }

    #[test]
    fn extra_edge_orders_without_forwarding() {
        let d = diamond(EdgeKind::Extra);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.root, [ChangeBlock::insert(0, 1)]);

        let order = run(&mut txn, &[d.a, d.b]);
        assert_eq!(order.last(), Some(&(d.leaf, 1)));
    }

    #[test]
    fn silent_upstream_delivers_nothing() {
        let d = diamond(EdgeKind::Structural);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.root, [ChangeBlock::insert(0, 1)]);

        // Neither derived node republishes.
        let order = run(&mut txn, &[]);
        assert_eq!(order.last(), Some(&(d.leaf, 0)));
    }

    #[test]
    fn settled_node_is_reactivated_by_new_blocks() {
        let d = diamond(EdgeKind::Structural);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.a, [ChangeBlock::insert(0, 1)]);

        let (node, _, _) = txn.pop_ready().unwrap();
        assert_eq!(node, d.a);
        txn.settle(node).unwrap();
        assert!(!txn.is_active(d.a));

        txn.record(d.a, [ChangeBlock::delete(0, 1)]);
        assert!(txn.is_active(d.a));

        // The leaf had not run yet, so it waits for the second round of `a`
        // and sees both rounds as one event.
        let (node, _, _) = txn.pop_ready().unwrap();
        assert_eq!(node, d.a);
        txn.settle(node).unwrap();

        let (node, inbox, _) = txn.pop_ready().unwrap();
        assert_eq!(node, d.leaf);
        assert_eq!(inbox.len(), 1);
        assert_eq!(
            inbox[0].blocks(),
            &[ChangeBlock::insert(0, 1), ChangeBlock::delete(0, 1)]
        );
        txn.settle(node).unwrap();
        assert!(txn.pop_ready().is_none());
    }

    #[test]
    fn node_waits_again_when_upstream_reactivates_mid_run() {
        let d = diamond(EdgeKind::Structural);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.a, [ChangeBlock::insert(0, 1)]);
        let (first, _, _) = txn.pop_ready().unwrap();
        txn.settle(first).unwrap();

        let (leaf, _, _) = txn.pop_ready().unwrap();
        assert_eq!(leaf, d.leaf);

        // While the leaf runs, its other upstream publishes.
        txn.record(d.b, [ChangeBlock::insert(0, 1)]);
        assert_eq!(txn.settle(leaf), None);

        let order = run(&mut txn, &[]);
        assert_eq!(order, vec![(d.b, 0), (d.leaf, 1)]);
        assert!(txn.stranded().is_empty());
    }

    #[test]
    fn output_is_coalesced() {
        let d = diamond(EdgeKind::Structural);
        let mut txn = Transaction::new(d.graph.snapshot_sinks(), true);
        txn.record(d.root, [ChangeBlock::insert(0, 1)]);
        txn.record(d.root, [ChangeBlock::insert(1, 2)]);

        let (root, _, _) = txn.pop_ready().unwrap();
        let settled = txn.settle(root).unwrap();
        assert_eq!(settled, Settled { blocks: 1, deliveries: 2 });
    }
}
