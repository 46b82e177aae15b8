//! Ripple Core
//!
//! This crate provides a change-propagation engine for observable lists.
//! It implements:
//!
//! - Observable lists that record every mutation as change blocks
//! - Derived lists (filter, map) that react to their sources
//! - A publisher that delivers change events in dependency order
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `event`: Change blocks, per-listener event cursors and the listener trait
//! - `graph`: The dependency graph, the delivery scheduler and the publisher
//! - `list`: Observable and derived lists
//!
//! # Guarantees
//!
//! For every mutation made outside a listener callback, the publisher runs
//! one transaction to completion before the mutating call returns:
//!
//! - A listener runs only after every list it depends on has reacted
//! - Each edge delivers at most one event per transaction
//! - Mutations made from inside a callback join the running transaction
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{FilterList, FnListener, ObservableList, Publisher};
//!
//! let publisher = Publisher::new();
//! let consoles = Arc::new(ObservableList::new(&publisher));
//! let handhelds = FilterList::new(&consoles, |name: &String| name.contains("Boy"))?;
//!
//! let handle = publisher.add_listener(Arc::new(FnListener::new(|mut event| {
//!     println!("{} blocks changed", event.drain());
//! })));
//! handhelds.subscribe(handle.id())?;
//!
//! consoles.push("Game Boy".to_string());
//! // Prints: "1 blocks changed"
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod list;

pub use config::PublisherConfig;
pub use error::{Result, RippleError};
pub use event::{ChangeBlock, ChangeEvent, ChangeKind, FnListener, ListEventListener};
pub use graph::{EdgeKind, ListenerHandle, NodeId, NodeKind, Publisher, PublisherStats};
pub use list::{FilterList, MapList, Mutation, ObservableList};
