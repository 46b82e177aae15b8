//! Observable Lists
//!
//! This module implements the lists that publish changes, and the derived
//! lists built on top of them.
//!
//! # Concepts
//!
//! ## Source Lists
//!
//! An [`ObservableList`] is a mutable sequence. Every mutation is recorded as
//! a change block and delivered to the list's subscribers.
//!
//! ## Derived Lists
//!
//! A derived list is both a listener and a list. It reacts to its source's
//! change event by updating its own contents, which publishes its own event
//! within the same transaction:
//!
//! - [`FilterList`]: the source elements matching a predicate
//! - [`MapList`]: every source element passed through a function
//!
//! Derived lists can be stacked, and a listener can depend on several of
//! them at once: the publisher guarantees it runs only after all of them
//! have caught up.

mod filter;
mod map;
mod observable;

pub use filter::FilterList;
pub use map::MapList;
pub use observable::{Mutation, ObservableList};
