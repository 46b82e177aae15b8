//! Change Events
//!
//! This module defines what flows along the edges of the dependency graph:
//!
//! - [`ChangeBlock`]: one contiguous insert, delete or update
//! - [`ChangeEvent`]: the blocks one list published in one transaction,
//!   wrapped in a per-listener cursor
//! - [`ListEventListener`]: the callback capability the publisher invokes

mod block;
mod change_event;
mod listener;

pub use block::{ChangeBlock, ChangeKind};
pub(crate) use block::push_coalesced;
pub use change_event::ChangeEvent;
pub use listener::{FnListener, ListEventListener};
