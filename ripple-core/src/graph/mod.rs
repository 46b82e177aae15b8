//! Dependency Graph
//!
//! This module implements the dependency graph between lists and listeners
//! and the scheduler that delivers change events along it.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are source lists, derived lists, or plain listeners
//! - Edges represent subscriptions: if B listens to A, there is an edge from A to B
//!
//! When a list changes, the publisher opens a transaction and delivers the
//! change downstream in topological order. Every node runs only after all of
//! its active upstream nodes have settled, and receives at most one event per
//! incoming edge.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized in the publisher rather than spread across
//!    the lists, so cycle detection and scheduling see the whole picture.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. Both forward (sinks) and reverse (sources) edges are kept so teardown
//!    and traversal are cheap in both directions. Edge sets preserve
//!    registration order so delivery order is deterministic.

mod dag;
mod node;
mod publisher;
mod scheduler;

pub use dag::DependencyGraph;
pub use node::{EdgeKind, Node, NodeId, NodeKind};
pub use publisher::{ListenerHandle, Publisher, PublisherStats};
